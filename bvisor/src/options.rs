//! Supervisor configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Static sandbox configuration (set once at creation, never changes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxOptions {
    /// Directory under which per-sandbox overlay trees are created.
    pub overlay_root: PathBuf,

    /// Hostname reported to the guest by uname(2).
    pub hostname: String,

    /// Uptime in seconds reported to the guest by sysinfo(2). The guest
    /// never sees the host's real uptime.
    pub virtual_uptime_secs: i64,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            overlay_root: PathBuf::from("/tmp/.bvisor"),
            hostname: "bvisor".to_string(),
            virtual_uptime_secs: 60,
        }
    }
}
