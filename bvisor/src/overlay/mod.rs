//! Per-sandbox overlay filesystem.
//!
//! Each sandbox owns a private directory tree:
//!
//! ```text
//! <overlay_root>/sb/<uid>/
//! ├── cow/   # mirrors the host layout, one entry per materialised copy-up
//! └── tmp/   # backs the guest's /tmp
//! ```
//!
//! The uid is 16 random bytes rendered as hex, which keeps concurrent
//! sandboxes from colliding. Teardown may leave contents behind; nothing in
//! the overlay is reused across supervisor runs.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use rand::RngCore;

use bvisor_shared::errors::{BvisorError, BvisorResult};

/// Random per-sandbox identifier, rendered as 32 hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SandboxUid([u8; 16]);

impl SandboxUid {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        SandboxUid(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for SandboxUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// One sandbox's private directory tree.
#[derive(Debug)]
pub struct OverlayRoot {
    uid: SandboxUid,
    cow_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl OverlayRoot {
    /// Create the overlay tree for a fresh sandbox under `root`.
    pub fn create(root: &Path) -> BvisorResult<Self> {
        let uid = SandboxUid::generate();
        let sandbox_dir = root.join("sb").join(uid.to_string());
        let cow_dir = sandbox_dir.join("cow");
        let tmp_dir = sandbox_dir.join("tmp");

        for dir in [&cow_dir, &tmp_dir] {
            fs::create_dir_all(dir).map_err(|e| {
                BvisorError::Internal(format!(
                    "failed to create overlay directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        tracing::debug!(uid = %uid, root = %root.display(), "created sandbox overlay");
        Ok(Self { uid, cow_dir, tmp_dir })
    }

    pub fn uid(&self) -> SandboxUid {
        self.uid
    }

    pub fn cow_dir(&self) -> &Path {
        &self.cow_dir
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    /// Overlay location of the COW copy for a normalised guest path.
    pub fn resolve_cow(&self, guest_path: &str) -> PathBuf {
        self.cow_dir.join(guest_path.trim_start_matches('/'))
    }

    /// Overlay location backing a normalised guest path under /tmp.
    ///
    /// Paths outside /tmp have no tmp-overlay meaning and are rejected.
    pub fn resolve_tmp(&self, guest_path: &str) -> BvisorResult<PathBuf> {
        if guest_path == "/tmp" {
            return Ok(self.tmp_dir.clone());
        }
        match guest_path.strip_prefix("/tmp/") {
            Some(rest) if !rest.is_empty() => Ok(self.tmp_dir.join(rest)),
            _ => Err(BvisorError::InvalidPath(format!(
                "{} is not under /tmp",
                guest_path
            ))),
        }
    }

    /// Whether a COW copy has been materialised for this guest path.
    pub fn cow_exists(&self, guest_path: &str) -> bool {
        self.resolve_cow(guest_path).exists()
    }

    /// Idempotently create the ancestor directories a copy-up needs.
    pub fn create_cow_parent_dirs(&self, guest_path: &str) -> BvisorResult<()> {
        let target = self.resolve_cow(guest_path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BvisorError::Internal(format!(
                    "failed to create cow parents for {}: {}",
                    target.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}
