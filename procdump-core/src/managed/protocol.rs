// .NET diagnostics IPC wire protocol (spec §6, normative per design notes:
// "The diagnostics protocol is a stable wire contract with the runtime;
// treat §6 bytes as normative"). All integers are little-endian.
//
// Framing style (explicit length-prefixed structs encoded by hand rather
// than derived) is grounded on `datadog-ipc`'s low-level platform framing
// in `platform/platform_handle.rs`, which hand-rolls its wire structs for
// the same reason: the layout is an external contract, not something serde
// should own.

use crate::error::ProcDumpError;
use std::io::{Read, Write};

pub const MAGIC: &[u8; 14] = b"DOTNET_IPC_V1\0";
pub const HEADER_LEN: usize = 24;

/// Result code for "profiler already loaded", surfaced as a specific
/// user-visible error (spec §6).
pub const HRESULT_PROFILER_ALREADY_ATTACHED: i32 = 0x8013136Au32 as i32;

#[derive(Debug, Clone, Copy)]
pub struct IpcHeader {
    pub total_size: u16,
    pub command_set: u8,
    pub command_id: u8,
}

// Command set/id values used by the dotnet diagnostics protocol for the
// operations this orchestrator needs.
pub const COMMANDSET_DUMP: u8 = 0x01;
pub const COMMAND_GENERATE_CORE_DUMP: u8 = 0x01;
pub const COMMANDSET_PROFILER: u8 = 0x03;
pub const COMMAND_ATTACH_PROFILER: u8 = 0x01;

impl IpcHeader {
    pub fn new(command_set: u8, command_id: u8, payload_len: usize) -> Self {
        Self {
            total_size: (HEADER_LEN + payload_len) as u16,
            command_set,
            command_id,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..14].copy_from_slice(MAGIC);
        buf[14..16].copy_from_slice(&self.total_size.to_le_bytes());
        buf[16] = self.command_set;
        buf[17] = self.command_id;
        // buf[18..20] reserved, left zeroed.
        buf
    }

    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self, ProcDumpError> {
        if &buf[0..14] != MAGIC {
            return Err(ProcDumpError::Ipc("bad response header magic".into()));
        }
        let total_size = u16::from_le_bytes([buf[14], buf[15]]);
        Ok(Self {
            total_size,
            command_set: buf[16],
            command_id: buf[17],
        })
    }
}

fn utf16_with_terminator(s: &str) -> Vec<u8> {
    let mut units: Vec<u16> = s.encode_utf16().collect();
    units.push(0);
    let mut bytes = Vec::with_capacity(units.len() * 2);
    for unit in units {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes
}

/// Builds a dump-request frame (spec §6 "Dump-request payload").
pub fn encode_dump_request(path: &str, dump_type: u32, logging_flags: u32) -> Vec<u8> {
    let path_bytes = utf16_with_terminator(path);
    let path_len_code_units = (path_bytes.len() / 2) as u32;

    let mut payload = Vec::new();
    payload.extend_from_slice(&path_len_code_units.to_le_bytes());
    payload.extend_from_slice(&path_bytes);
    payload.extend_from_slice(&dump_type.to_le_bytes());
    payload.extend_from_slice(&logging_flags.to_le_bytes());

    let header = IpcHeader::new(COMMANDSET_DUMP, COMMAND_GENERATE_CORE_DUMP, payload.len());
    let mut frame = header.encode().to_vec();
    frame.extend_from_slice(&payload);
    frame
}

/// Builds an attach-profiler frame (spec §6 "Attach-profiler payload").
pub fn encode_attach_profiler(
    attach_timeout_ms: u32,
    clsid: &[u8; 16],
    profiler_path: &str,
    client_data: &[u8],
) -> Vec<u8> {
    let path_bytes = utf16_with_terminator(profiler_path);

    let mut payload = Vec::new();
    payload.extend_from_slice(&attach_timeout_ms.to_le_bytes());
    payload.extend_from_slice(clsid);
    payload.extend_from_slice(&(path_bytes.len() as u32).to_le_bytes());
    payload.extend_from_slice(&path_bytes);
    payload.extend_from_slice(&(client_data.len() as u32).to_le_bytes());
    payload.extend_from_slice(client_data);

    let header = IpcHeader::new(COMMANDSET_PROFILER, COMMAND_ATTACH_PROFILER, payload.len());
    let mut frame = header.encode().to_vec();
    frame.extend_from_slice(&payload);
    frame
}

/// Sends `frame` over `stream`, then reads the 24-byte response header and
/// the 4-byte signed HRESULT body, returning the HRESULT (spec §4.3 step 5,
/// §6 "Response header").
pub fn send_request_and_read_result(
    stream: &mut (impl Read + Write),
    frame: &[u8],
) -> Result<i32, ProcDumpError> {
    stream
        .write_all(frame)
        .map_err(|e| ProcDumpError::Ipc(format!("failed writing request: {e}")))?;

    let mut header_buf = [0u8; HEADER_LEN];
    stream
        .read_exact(&mut header_buf)
        .map_err(|e| ProcDumpError::Ipc(format!("short read on response header: {e}")))?;
    IpcHeader::decode(&header_buf)?;

    let mut result_buf = [0u8; 4];
    stream
        .read_exact(&mut result_buf)
        .map_err(|e| ProcDumpError::Ipc(format!("short read on response body: {e}")))?;
    Ok(i32::from_le_bytes(result_buf))
}

/// Builds the `;`-separated client-data string sent in the attach-profiler
/// payload (spec §6): `trigger_kind;output_path;orchestrator_pid;...`.
pub fn build_client_data(
    trigger_kind: &str,
    output_path_with_trailing_slash_if_no_base: &str,
    orchestrator_pid: i32,
    extra_fields: &[String],
) -> String {
    let mut fields = vec![
        trigger_kind.to_string(),
        output_path_with_trailing_slash_if_no_base.to_string(),
        orchestrator_pid.to_string(),
    ];
    fields.extend(extra_fields.iter().cloned());
    fields.join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_round_trips() {
        let header = IpcHeader::new(COMMANDSET_DUMP, COMMAND_GENERATE_CORE_DUMP, 10);
        let encoded = header.encode();
        let decoded = IpcHeader::decode(&encoded).unwrap();
        assert_eq!(decoded.command_set, COMMANDSET_DUMP);
        assert_eq!(decoded.command_id, COMMAND_GENERATE_CORE_DUMP);
        assert_eq!(decoded.total_size as usize, HEADER_LEN + 10);
    }

    #[test]
    fn dump_request_encodes_utf16_path_with_terminator() {
        let frame = encode_dump_request("/tmp/out", 1, 0);
        assert!(frame.len() > HEADER_LEN);
        let path_len = u32::from_le_bytes(frame[HEADER_LEN..HEADER_LEN + 4].try_into().unwrap());
        // "/tmp/out" is 8 chars + 1 null terminator.
        assert_eq!(path_len, 9);
    }

    #[test]
    fn client_data_join_matches_spec_shape() {
        let data = build_client_data("exception", "/tmp/dumps/", 999, &["System.InvalidOperationException:1".into()]);
        assert_eq!(data, "exception;/tmp/dumps/;999;System.InvalidOperationException:1");
    }

    #[test]
    fn send_request_reads_hresult() {
        let mut response = Vec::new();
        response.extend_from_slice(&IpcHeader::new(COMMANDSET_DUMP, COMMAND_GENERATE_CORE_DUMP, 4).encode());
        response.extend_from_slice(&0i32.to_le_bytes());
        let mut cursor = Cursor::new(response);
        // We can't also write into this cursor meaningfully as a request
        // target, so just verify parsing the header+body half of the pair.
        let mut header_buf = [0u8; HEADER_LEN];
        std::io::Read::read_exact(&mut cursor, &mut header_buf).unwrap();
        IpcHeader::decode(&header_buf).unwrap();
        let mut result_buf = [0u8; 4];
        std::io::Read::read_exact(&mut cursor, &mut result_buf).unwrap();
        assert_eq!(i32::from_le_bytes(result_buf), 0);
    }
}
