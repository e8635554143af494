//! Lock module.
//!
//! This module contains the advisory lock service taken around the
//! operations writing to local mailboxes. Contention is reported as
//! `Ok(None)` so the caller can turn it into a retryable result
//! instead of an error.

use log::{debug, trace};
use proc_lock::{try_lock, LockPath};
use std::{
    any::Any,
    fmt, io,
    path::{Path, PathBuf},
};

/// Represents an acquired lock, released when dropped.
pub struct LockGuard {
    path: PathBuf,
    _inner: Box<dyn Any>,
}

impl LockGuard {
    pub fn new<G: 'static>(path: PathBuf, guard: G) -> Self {
        Self {
            path,
            _inner: Box::new(guard),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LockGuard").field("path", &self.path).finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        trace!("releasing lock {:?}", self.path);
    }
}

pub trait LockService {
    /// Tries to acquire the lock protecting the given resource
    /// without blocking.
    fn try_acquire(&self, resource: &Path) -> io::Result<Option<LockGuard>>;
}

/// Lock service based on lock files, through the `proc-lock` crate.
#[derive(Debug, Default, Clone)]
pub struct ProcLockService {
    /// Directory holding the lock files. Lock files are created next
    /// to the locked resource when unset.
    pub dir: Option<PathBuf>,
}

impl ProcLockService {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Builds the lock file path of the given resource.
    pub fn lock_path(&self, resource: &Path) -> PathBuf {
        let name = resource
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| String::from("mailbox"));

        match &self.dir {
            Some(dir) => {
                let hash = format!("{:x}", md5::compute(resource.to_string_lossy().as_bytes()));
                dir.join(format!("{}-{}.lock", name, &hash[..8]))
            }
            None => resource.with_file_name(format!("{}.lock", name)),
        }
    }
}

impl LockService for ProcLockService {
    fn try_acquire(&self, resource: &Path) -> io::Result<Option<LockGuard>> {
        let path = self.lock_path(resource);
        debug!("trying to lock {:?}", path);

        match try_lock(&LockPath::FullPath(path.clone())) {
            Ok(guard) => Ok(Some(LockGuard::new(path, guard))),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                debug!("lock {:?} is held elsewhere", path);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_path_next_to_resource() {
        let service = ProcLockService::default();
        assert_eq!(
            PathBuf::from("/mail/inbox.lock"),
            service.lock_path(Path::new("/mail/inbox"))
        );
    }

    #[test]
    fn lock_path_in_lock_dir() {
        let service = ProcLockService::new(Some("/run/locks".into()));
        let path = service.lock_path(Path::new("/mail/inbox"));
        assert!(path.starts_with("/run/locks"));
        assert!(path.to_string_lossy().ends_with(".lock"));
    }
}
