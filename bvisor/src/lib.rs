//! bvisor supervisor library.
//!
//! A guest process tree runs on the host kernel with a seccomp filter that
//! routes every syscall to a user-space notifier; this crate is the sibling
//! process that answers. It keeps a model of the guest's threads, pid
//! namespaces and file descriptors, routes paths through a copy-on-write
//! overlay, and decides per syscall whether the kernel runs it, the guest
//! gets a synthesised result, or the call is refused.
//!
//! Filter installation and guest bootstrap live with the embedder; the
//! supervisor starts from an already-connected notifier fd.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static LOG_INIT: OnceLock<()> = OnceLock::new();

pub mod ids;
pub mod mem;
pub mod notifier;
pub mod options;
pub mod overlay;
pub mod policy;
pub mod router;
pub mod supervisor;
pub mod syscall;
pub mod task;
pub mod vfs;

pub use bvisor_shared::errors::{BvisorError, BvisorResult};
pub use ids::{AbsTgid, AbsTid, NsTgid, NsTid, Vfd};
pub use notifier::{Notif, Notifier, Response};
pub use options::SandboxOptions;
pub use supervisor::Supervisor;

/// Initialize tracing for the supervisor.
///
/// Uses the `RUST_LOG` environment variable for filtering (defaults to
/// `info`). Idempotent: subsequent calls return immediately once
/// initialized, and a subscriber installed by the embedder wins.
pub fn init_logging() {
    LOG_INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("info"))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        // If a global subscriber is already set this returns an error; we
        // ignore it to avoid interfering with host-configured tracing.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
