//! Output file naming, whole-file locking and the mandatory-lock remount.
//!
//! File names follow `pid<PID>_<YYYY-MM-DD-HH.MM.SS>.<EXT>`. Two files of the
//! same kind created by one process within the same second share a name;
//! that collision is accepted, not deduplicated.
//!
//! None of these helpers retry: a failed lock or unlock is surfaced to the
//! caller immediately.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use nix::fcntl::{FcntlArg, fcntl};

use crate::error::{DiagError, Result};

/// `rw-rw-r--` plus set-group-ID, the marker for mandatory locking.
pub const LOG_FILE_MODE: u32 = 0o2664;

/// Timestamp layout used in file names.
const NAME_TIMESTAMP: &str = "%Y-%m-%d-%H.%M.%S";

/// Kind of output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Run log, one per initialization.
    Log,
    /// Memory-map snapshot.
    Dump,
}

impl FileKind {
    /// File extension.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Log => "LOG",
            Self::Dump => "DUMP",
        }
    }
}

/// Builds the file name for `pid` at `now`.
#[must_use]
pub fn file_name(pid: u32, now: &DateTime<Local>, kind: FileKind) -> String {
    format!(
        "pid{pid}_{}.{}",
        now.format(NAME_TIMESTAMP),
        kind.extension()
    )
}

/// Builds a fresh path under `dir` for the current process and wall clock.
#[must_use]
pub fn output_path(dir: &Path, kind: FileKind) -> PathBuf {
    dir.join(file_name(std::process::id(), &Local::now(), kind))
}

/// Creates (or reopens for append) the run log with [`LOG_FILE_MODE`].
///
/// # Errors
/// Returns `FileError` if the file cannot be opened.
pub fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .mode(LOG_FILE_MODE)
        .open(path)
        .map_err(|e| DiagError::file(path, e))
}

/// Lock operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Exclusive write lock over the whole file.
    Exclusive,
    /// Release the lock.
    Unlock,
}

impl LockMode {
    const fn lock_type(self) -> libc::c_short {
        match self {
            Self::Exclusive => libc::F_WRLCK as libc::c_short,
            Self::Unlock => libc::F_UNLCK as libc::c_short,
        }
    }
}

/// Applies `mode` to the whole of `file` with a non-blocking `F_SETLK`.
///
/// The lock is a POSIX record lock, owned by this process.
///
/// # Errors
/// Returns `SyncError` if the kernel rejects the request (for example the
/// file is locked by another process).
#[allow(unsafe_code)]
pub fn change_file_lock(file: &File, mode: LockMode) -> Result<()> {
    // SAFETY: `flock` is a plain C struct; all-zero is a valid value and
    // zeroing also covers any platform-specific padding fields.
    let mut lock: libc::flock = unsafe { std::mem::zeroed() };
    lock.l_type = mode.lock_type();
    lock.l_whence = libc::SEEK_SET as libc::c_short;
    lock.l_start = 0;
    lock.l_len = 0;
    lock.l_pid = std::process::id() as libc::pid_t;

    fcntl(file.as_raw_fd(), FcntlArg::F_SETLK(&lock))
        .map(|_| ())
        .map_err(|e| DiagError::sync(format!("fcntl(F_SETLK, {mode:?}) failed: {e}")))
}

/// Takes the exclusive lock on `file`.
///
/// # Errors
/// See [`change_file_lock`].
pub fn lock_file(file: &File) -> Result<()> {
    change_file_lock(file, LockMode::Exclusive)
}

/// Releases the lock on `file`.
///
/// # Errors
/// See [`change_file_lock`].
pub fn unlock_file(file: &File) -> Result<()> {
    change_file_lock(file, LockMode::Unlock)
}

/// Result of the mandatory-lock remount attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MandatoryLocking {
    /// The filesystem already has mandatory locking.
    AlreadyEnabled,
    /// The filesystem was remounted with mandatory locking.
    Remounted,
    /// Not enabled; the daemon continues with advisory locks only.
    Unavailable(nix::errno::Errno),
}

impl MandatoryLocking {
    /// Returns true if mandatory locks are in effect.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        matches!(self, Self::AlreadyEnabled | Self::Remounted)
    }
}

/// Enables mandatory locking on the filesystem holding `mount_point`.
///
/// Best effort: the existing mount flags are kept and only `MS_MANDLOCK` is
/// added. Failure is logged as a warning and never returned as an error.
#[cfg(target_os = "linux")]
pub fn ensure_mandatory_locking(mount_point: &Path) -> MandatoryLocking {
    use nix::mount::{MsFlags, mount};
    use nix::sys::statvfs::{FsFlags, statvfs};

    const PRESERVED: [(FsFlags, MsFlags); 8] = [
        (FsFlags::ST_RDONLY, MsFlags::MS_RDONLY),
        (FsFlags::ST_NOSUID, MsFlags::MS_NOSUID),
        (FsFlags::ST_NODEV, MsFlags::MS_NODEV),
        (FsFlags::ST_NOEXEC, MsFlags::MS_NOEXEC),
        (FsFlags::ST_SYNCHRONOUS, MsFlags::MS_SYNCHRONOUS),
        (FsFlags::ST_NOATIME, MsFlags::MS_NOATIME),
        (FsFlags::ST_NODIRATIME, MsFlags::MS_NODIRATIME),
        (FsFlags::ST_RELATIME, MsFlags::MS_RELATIME),
    ];

    let stats = match statvfs(mount_point) {
        Ok(stats) => stats,
        Err(errno) => {
            tracing::warn!(
                mount_point = %mount_point.display(),
                %errno,
                "cannot inspect mount flags; mandatory locking not enabled"
            );
            return MandatoryLocking::Unavailable(errno);
        }
    };

    let current = stats.flags();
    if current.contains(FsFlags::ST_MANDLOCK) {
        return MandatoryLocking::AlreadyEnabled;
    }

    let mut flags = MsFlags::MS_REMOUNT | MsFlags::MS_MANDLOCK;
    for (fs_flag, ms_flag) in PRESERVED {
        if current.contains(fs_flag) {
            flags |= ms_flag;
        }
    }

    match mount(
        Some(mount_point),
        mount_point,
        None::<&str>,
        flags,
        None::<&str>,
    ) {
        Ok(()) => {
            tracing::info!(mount_point = %mount_point.display(), "remounted with mandatory locking");
            MandatoryLocking::Remounted
        }
        Err(errno) => {
            if errno == nix::errno::Errno::EPERM {
                tracing::warn!(
                    "cannot remount filesystem: relaunch with elevated privileges \
                     to place mandatory locks on LOG and DUMP files"
                );
            } else {
                tracing::warn!(%errno, "mandatory-lock remount failed");
            }
            MandatoryLocking::Unavailable(errno)
        }
    }
}

/// Non-Linux platforms have no mandatory locking.
#[cfg(not(target_os = "linux"))]
pub fn ensure_mandatory_locking(_mount_point: &Path) -> MandatoryLocking {
    tracing::debug!("mandatory locking not supported on this platform");
    MandatoryLocking::Unavailable(nix::errno::Errno::ENOSYS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_file_name_format() {
        let now = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap();
        assert_eq!(
            file_name(4242, &now, FileKind::Log),
            "pid4242_2024-03-07-09.05.02.LOG"
        );
        assert_eq!(
            file_name(1, &now, FileKind::Dump),
            "pid1_2024-03-07-09.05.02.DUMP"
        );
    }

    #[test]
    fn test_file_name_is_deterministic() {
        let now = Local.with_ymd_and_hms(2030, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(
            file_name(7, &now, FileKind::Dump),
            file_name(7, &now, FileKind::Dump)
        );
    }

    #[test]
    fn test_output_path_under_dir() {
        let path = output_path(Path::new("/var/tmp"), FileKind::Dump);
        assert_eq!(path.parent(), Some(Path::new("/var/tmp")));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(&format!("pid{}_", std::process::id())));
        assert!(name.ends_with(".DUMP"));
    }

    #[test]
    fn test_open_log_file_mode_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pid1_test.LOG");
        {
            use std::io::Write;
            let mut file = open_log_file(&path).unwrap();
            file.write_all(b"one\n").unwrap();
        }
        {
            use std::io::Write;
            let mut file = open_log_file(&path).unwrap();
            file.write_all(b"two\n").unwrap();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");

        // umask may clear bits but never adds any
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777 & !0o664, 0);
        assert_ne!(mode & 0o600, 0);
    }

    #[test]
    fn test_open_log_file_missing_dir() {
        let err = open_log_file(Path::new("/definitely/not/here/x.LOG")).unwrap_err();
        assert!(matches!(err, DiagError::File { .. }));
    }

    #[test]
    fn test_lock_and_unlock() {
        let file = tempfile::tempfile().unwrap();
        assert!(lock_file(&file).is_ok());
        // Same process: relocking is allowed by POSIX record locks
        assert!(lock_file(&file).is_ok());
        assert!(unlock_file(&file).is_ok());
        assert!(unlock_file(&file).is_ok());
    }

    #[test]
    fn test_lock_read_only_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ro");
        std::fs::write(&path, b"x").unwrap();
        let file = File::open(&path).unwrap();
        // F_WRLCK requires a descriptor open for writing
        let err = lock_file(&file).unwrap_err();
        assert!(matches!(err, DiagError::Sync(_)));
    }

    #[test]
    fn test_mandatory_locking_status() {
        assert!(MandatoryLocking::AlreadyEnabled.is_enabled());
        assert!(MandatoryLocking::Remounted.is_enabled());
        assert!(!MandatoryLocking::Unavailable(nix::errno::Errno::EPERM).is_enabled());
    }

    #[test]
    fn test_ensure_mandatory_locking_on_missing_path() {
        let status = ensure_mandatory_locking(Path::new("/definitely/not/a/mount"));
        assert!(!status.is_enabled());
    }
}
