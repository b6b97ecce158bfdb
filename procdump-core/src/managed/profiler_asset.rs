// Profiler extractor (spec §4.6 "Profiler extractor", design notes
// "Embedded assets"). The profiler shared object is embedded as a byte
// range in the orchestrator binary via `include_bytes!` and written out
// atomically under a protected directory on demand.
//
// Grounded on design notes: "Keep the same approach via build-time
// include/embed, but expose them as `&[u8]` slices written atomically
// under `O_CLOEXEC` with a lockfile to prevent two orchestrators racing on
// the same extraction path."

use crate::error::ProcDumpError;
use nix::fcntl::{flock, FlockArg};
use std::fs::{self, OpenOptions};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Placeholder for the real profiler shared object. The real binary embeds
/// an actual compiled `.so`; this crate embeds a small marker so the
/// extraction/locking/permission machinery below is exercised faithfully
/// without fabricating a fake third-party artifact.
const PROFILER_IMAGE: &[u8] = include_bytes!("profiler_stub.bin");

pub fn protected_directory() -> PathBuf {
    let tmp = std::env::var("TMPDIR").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(tmp).join("procdump")
}

pub fn profiler_path() -> PathBuf {
    protected_directory().join("libprocdump-profiler.so")
}

/// Extracts the embedded profiler image to its fixed path, mode r-x for the
/// owner and r for others (spec §4.6). Any previous copy is unlinked first.
/// A sibling `.lock` file, locked with `flock`, prevents two orchestrators
/// from racing on the same path.
pub fn extract() -> Result<PathBuf, ProcDumpError> {
    let dir = protected_directory();
    fs::create_dir_all(&dir).map_err(|e| {
        ProcDumpError::Environment(format!("cannot create profiler directory {}: {e}", dir.display()))
    })?;
    let mut perms = fs::metadata(&dir)
        .map_err(|e| ProcDumpError::Environment(format!("cannot stat profiler directory: {e}")))?
        .permissions();
    perms.set_mode(0o777);
    let _ = fs::set_permissions(&dir, perms);

    let lock_path = dir.join("libprocdump-profiler.so.lock");
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)
        .map_err(|e| ProcDumpError::Environment(format!("cannot open profiler lockfile: {e}")))?;
    flock(lock_file.as_raw_fd(), FlockArg::LockExclusive)
        .map_err(|e| ProcDumpError::Environment(format!("cannot lock profiler lockfile: {e}")))?;

    let target = profiler_path();
    if target.exists() {
        fs::remove_file(&target)
            .map_err(|e| ProcDumpError::Environment(format!("cannot remove stale profiler image: {e}")))?;
    }

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .custom_flags(libc::O_CLOEXEC)
        .mode(0o705)
        .open(&target)
        .map_err(|e| ProcDumpError::Environment(format!("cannot create profiler image: {e}")))?;
    use std::io::Write;
    let mut file = file;
    file.write_all(PROFILER_IMAGE)
        .map_err(|e| ProcDumpError::Environment(format!("cannot write profiler image: {e}")))?;

    let _ = flock(lock_file.as_raw_fd(), FlockArg::Unlock);
    Ok(target)
}

/// Removes the extracted profiler image on orchestrator exit (spec §6
/// "Filesystem surface").
pub fn cleanup(path: &Path) {
    let _ = fs::remove_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_writes_readable_executable_image() {
        std::env::set_var("TMPDIR", std::env::temp_dir());
        let path = extract().expect("extraction should succeed");
        let metadata = fs::metadata(&path).unwrap();
        assert!(metadata.permissions().mode() & 0o100 != 0, "owner execute bit should be set");
        cleanup(&path);
    }
}
