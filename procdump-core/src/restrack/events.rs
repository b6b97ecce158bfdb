// Resource-tracking event wire layout (spec §3 "Resource-tracking event",
// §4.4 "Protocol between user-probe and return-probe pair"). Events arrive
// as raw bytes from the kernel-trace program's ring buffer; this module
// only knows how to parse them, not how to transport them.

use crate::error::ProcDumpError;

/// User-stack frames are bounded to 100 entries per event (spec §3).
pub const MAX_STACK_FRAMES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Alloc,
    Free,
}

impl EventKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(EventKind::Alloc),
            1 => Some(EventKind::Free),
            _ => None,
        }
    }
}

/// One allocation or free record (spec §3 "Resource-tracking event").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEvent {
    pub kind: EventKind,
    pub pid: i32,
    /// Allocation size; zero on `Free` events.
    pub size: u64,
    /// Returned address (alloc) or freed address (free).
    pub address: u64,
    pub stack: Vec<u64>,
    pub sample_counter: u64,
}

// Wire layout, all little-endian, emitted by the kernel-trace program:
// [0]      kind byte
// [1..5]   pid (u32)
// [5..13]  size (u64)
// [13..21] address (u64)
// [21..29] sample_counter (u64)
// [29..31] stack_len (u16), capped at MAX_STACK_FRAMES
// [31..]   stack_len * 8 bytes of u64 frame addresses
const HEADER_LEN: usize = 31;

impl ResourceEvent {
    pub fn parse(buf: &[u8]) -> Result<Self, ProcDumpError> {
        if buf.len() < HEADER_LEN {
            return Err(ProcDumpError::Resource(format!(
                "short resource event: {} bytes",
                buf.len()
            )));
        }
        let kind = EventKind::from_byte(buf[0])
            .ok_or_else(|| ProcDumpError::Resource(format!("unknown event kind byte 0x{:02X}", buf[0])))?;
        let pid = u32::from_le_bytes(buf[1..5].try_into().unwrap()) as i32;
        let size = u64::from_le_bytes(buf[5..13].try_into().unwrap());
        let address = u64::from_le_bytes(buf[13..21].try_into().unwrap());
        let sample_counter = u64::from_le_bytes(buf[21..29].try_into().unwrap());
        let stack_len = u16::from_le_bytes(buf[29..31].try_into().unwrap()) as usize;
        let stack_len = stack_len.min(MAX_STACK_FRAMES);

        let needed = HEADER_LEN + stack_len * 8;
        if buf.len() < needed {
            return Err(ProcDumpError::Resource(format!(
                "truncated resource event: need {needed} bytes, have {}",
                buf.len()
            )));
        }

        let mut stack = Vec::with_capacity(stack_len);
        for i in 0..stack_len {
            let start = HEADER_LEN + i * 8;
            stack.push(u64::from_le_bytes(buf[start..start + 8].try_into().unwrap()));
        }

        Ok(Self {
            kind,
            pid,
            size,
            address,
            stack,
            sample_counter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(kind: u8, pid: u32, size: u64, address: u64, sample_counter: u64, stack: &[u64]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(kind);
        buf.extend_from_slice(&pid.to_le_bytes());
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&address.to_le_bytes());
        buf.extend_from_slice(&sample_counter.to_le_bytes());
        buf.extend_from_slice(&(stack.len() as u16).to_le_bytes());
        for frame in stack {
            buf.extend_from_slice(&frame.to_le_bytes());
        }
        buf
    }

    #[test]
    fn parses_alloc_event_with_stack() {
        let buf = encode(0, 4242, 64, 0xdead_beef, 7, &[0x1000, 0x2000, 0x3000]);
        let event = ResourceEvent::parse(&buf).unwrap();
        assert_eq!(event.kind, EventKind::Alloc);
        assert_eq!(event.pid, 4242);
        assert_eq!(event.size, 64);
        assert_eq!(event.address, 0xdead_beef);
        assert_eq!(event.stack, vec![0x1000, 0x2000, 0x3000]);
        assert_eq!(event.sample_counter, 7);
    }

    #[test]
    fn parses_free_event() {
        let buf = encode(1, 4242, 0, 0xdead_beef, 8, &[]);
        let event = ResourceEvent::parse(&buf).unwrap();
        assert_eq!(event.kind, EventKind::Free);
        assert!(event.stack.is_empty());
    }

    #[test]
    fn rejects_truncated_buffer() {
        let buf = encode(0, 1, 1, 1, 1, &[1, 2]);
        assert!(ResourceEvent::parse(&buf[..HEADER_LEN + 8]).is_err());
    }

    #[test]
    fn rejects_unknown_kind() {
        let mut buf = encode(0, 1, 1, 1, 1, &[]);
        buf[0] = 0xFF;
        assert!(ResourceEvent::parse(&buf).is_err());
    }
}
