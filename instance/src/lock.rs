use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Advisory `flock(2)` lock on `<identity>.lock`.
///
/// The kernel drops the lock when the holder's descriptor closes, so a
/// crashed master never leaves a lock behind that needs a grace period.
/// The file itself carries no payload.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    file: Option<File>,
}

impl InstanceLock {
    pub fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Non-blocking. `Ok(false)` means another live process holds the lock.
    pub fn try_acquire(&mut self) -> io::Result<bool> {
        if self.file.is_some() {
            return Ok(true);
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let f = open_lock_file(&self.path)?;
        if !try_flock(&f)? {
            log::debug!("lock: busy path={}", self.path.display());
            return Ok(false);
        }
        log::debug!("lock: acquired path={}", self.path.display());
        self.file = Some(f);
        Ok(true)
    }

    /// Idempotent. The file stays on disk: unlinking a path somebody may be
    /// about to flock would let two processes lock two different inodes.
    pub fn release(&mut self) {
        if let Some(f) = self.file.take() {
            unsafe {
                libc::flock(f.as_raw_fd(), libc::LOCK_UN);
            }
            log::debug!("lock: released path={}", self.path.display());
        }
    }

    /// Whether some other descriptor holds the lock right now.
    ///
    /// Never creates or unlinks the file. A missing file has no holder. The
    /// probe lock is dropped before returning, so the caller still has to win
    /// [`try_acquire`](Self::try_acquire) on the same inode.
    pub fn has_live_holder(&self) -> io::Result<bool> {
        debug_assert!(!self.is_held(), "has_live_holder called by the lock holder");
        let f = match OpenOptions::new().read(true).open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(!try_flock(&f)?)
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    let rw = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path);
    match rw {
        // A global lock created by another user may be read-only for us;
        // flock works just as well on a read-only descriptor.
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            OpenOptions::new().read(true).open(path)
        }
        other => other,
    }
}

fn try_flock(f: &File) -> io::Result<bool> {
    let rc = unsafe { libc::flock(f.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let e = io::Error::last_os_error();
    // EWOULDBLOCK means another instance holds the lock.
    if e.raw_os_error() == Some(libc::EWOULDBLOCK) {
        return Ok(false);
    }
    Err(e)
}
