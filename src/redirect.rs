use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;

use crate::ast::RedirKind;

/// A saved copy of a standard descriptor, restored on `restore` or drop.
///
/// The save is made with `F_DUPFD_CLOEXEC` so children spawned while the
/// original fd is rewired never see the saved copy.
pub struct SavedFd {
    target: RawFd,
    saved: RawFd,
    restored: bool,
}

impl SavedFd {
    pub fn new(target: RawFd) -> io::Result<Self> {
        let saved = loop {
            // Land saves above the fd range user programs care about.
            let rc = unsafe { libc::fcntl(target, libc::F_DUPFD_CLOEXEC, 10) };
            if rc >= 0 {
                break rc;
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        };

        Ok(Self {
            target,
            saved,
            restored: false,
        })
    }

    /// Put the saved descriptor back and close the save. Idempotent.
    pub fn restore(&mut self) -> io::Result<()> {
        if self.restored {
            return Ok(());
        }
        let result = dup_onto(self.saved, self.target);
        unsafe {
            libc::close(self.saved);
        }
        self.restored = true;
        result
    }
}

impl Drop for SavedFd {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

/// Save stdin, stdout, and stderr. All three are saved unconditionally so
/// chained redirections unwind cleanly; drop order (reverse of creation)
/// restores them.
pub fn save_std_fds() -> io::Result<[SavedFd; 3]> {
    Ok([
        SavedFd::new(libc::STDIN_FILENO)?,
        SavedFd::new(libc::STDOUT_FILENO)?,
        SavedFd::new(libc::STDERR_FILENO)?,
    ])
}

/// Duplicate `src` over `target`, retrying on EINTR. The duplicate loses
/// close-on-exec, which is what lets children inherit the rewired fd.
pub fn dup_onto(src: RawFd, target: RawFd) -> io::Result<()> {
    loop {
        if unsafe { libc::dup2(src, target) } >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

/// Open a redirection target with the flags its kind calls for. Every open
/// is close-on-exec; only the dup2 over a standard fd is inherited.
pub fn open_target(kind: RedirKind, path: &str) -> io::Result<File> {
    let mut options = OpenOptions::new();
    match kind {
        RedirKind::In => {
            options.read(true);
        }
        RedirKind::Out | RedirKind::Err | RedirKind::ErrOut => {
            options.write(true).create(true).truncate(true);
        }
        RedirKind::Append => {
            options.write(true).create(true).append(true);
        }
    }
    options.custom_flags(libc::O_CLOEXEC).open(path)
}

/// Rewire the standard fd(s) a redirection kind targets onto `file`.
pub fn wire(kind: RedirKind, file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    match kind {
        RedirKind::In => dup_onto(fd, libc::STDIN_FILENO),
        RedirKind::Out | RedirKind::Append => dup_onto(fd, libc::STDOUT_FILENO),
        RedirKind::Err => dup_onto(fd, libc::STDERR_FILENO),
        RedirKind::ErrOut => {
            dup_onto(fd, libc::STDOUT_FILENO)?;
            dup_onto(fd, libc::STDERR_FILENO)
        }
    }
}
