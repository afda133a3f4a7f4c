//! Per-thread filesystem state (cwd, root, umask).

use std::sync::Arc;

use parking_lot::Mutex;

/// Shared under `CLONE_FS`, otherwise cloned at registration time.
pub type FsInfoRef = Arc<FsInfo>;

#[derive(Debug)]
pub struct FsInfo {
    inner: Mutex<State>,
}

#[derive(Debug, Clone)]
struct State {
    cwd: String,
    root: String,
    umask: u32,
}

impl FsInfo {
    pub fn new(cwd: &str) -> FsInfoRef {
        Arc::new(FsInfo {
            inner: Mutex::new(State {
                cwd: cwd.to_string(),
                root: "/".to_string(),
                umask: 0o022,
            }),
        })
    }

    pub fn cwd(&self) -> String {
        self.inner.lock().cwd.clone()
    }

    pub fn set_cwd(&self, cwd: &str) {
        self.inner.lock().cwd = cwd.to_string();
    }

    pub fn root(&self) -> String {
        self.inner.lock().root.clone()
    }

    pub fn umask(&self) -> u32 {
        self.inner.lock().umask
    }

    pub fn set_umask(&self, umask: u32) -> u32 {
        let mut inner = self.inner.lock();
        std::mem::replace(&mut inner.umask, umask & 0o777)
    }

    /// Independent copy for a clone without `CLONE_FS`.
    pub fn clone_info(&self) -> FsInfoRef {
        Arc::new(FsInfo {
            inner: Mutex::new(self.inner.lock().clone()),
        })
    }
}
