//! Supervisor core: owns the model, runs the notification loop.

use crate::ids::AbsTid;
use crate::mem::GuestMemory;
use crate::notifier::{Notif, Notifier, Response};
use crate::options::SandboxOptions;
use crate::overlay::OverlayRoot;
use crate::syscall;
use crate::task::{PidInfo, Registry, ThreadRef};
use bvisor_shared::errors::BvisorResult;

/// One sandbox's supervisor.
///
/// Owns the guest model (registry, overlay, memory bridge) and adjudicates
/// every intercepted syscall. Handlers run to completion one at a time on
/// the calling thread; graph mutations serialise on the registry's internal
/// lock while host I/O happens outside it, so handlers do not line up behind
/// each other's reads and writes.
pub struct Supervisor {
    options: SandboxOptions,
    memory: Box<dyn GuestMemory>,
    registry: Registry,
    overlay: OverlayRoot,
    init: ThreadRef,
}

impl Supervisor {
    /// Build a supervisor for a guest whose leader thread is `init_tid`.
    ///
    /// All setup completes before returning: the overlay tree exists on disk
    /// and the root thread is registered with fresh namespace, group, fd
    /// table and fs info.
    pub fn new(
        options: SandboxOptions,
        init_tid: AbsTid,
        memory: Box<dyn GuestMemory>,
        pid_info: Box<dyn PidInfo>,
    ) -> BvisorResult<Self> {
        let overlay = OverlayRoot::create(&options.overlay_root)?;
        let registry = Registry::new(pid_info);
        let init = registry.register_root(init_tid)?;

        tracing::info!(
            init = %init_tid,
            overlay = %overlay.uid(),
            "sandbox supervisor ready"
        );
        Ok(Self {
            options,
            memory,
            registry,
            overlay,
            init,
        })
    }

    pub fn options(&self) -> &SandboxOptions {
        &self.options
    }

    pub fn memory(&self) -> &dyn GuestMemory {
        self.memory.as_ref()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn overlay(&self) -> &OverlayRoot {
        &self.overlay
    }

    /// The sandbox's initial thread.
    pub fn init_thread(&self) -> &ThreadRef {
        &self.init
    }

    /// Adjudicate a single notification.
    ///
    /// Public so the handler pipeline can be driven without a kernel
    /// notifier behind it.
    pub fn handle(&self, notif: &Notif) -> BvisorResult<Response> {
        syscall::dispatch(self, notif)
    }

    /// Serve notifications until the guest is gone.
    ///
    /// Notifications are processed strictly in arrival order; each guest
    /// thread stays blocked until its response lands. Internal errors
    /// terminate the loop; everything else becomes an errno for the guest.
    pub fn run(&self, notifier: &Notifier) -> BvisorResult<()> {
        loop {
            let Some(notif) = notifier.recv()? else {
                tracing::info!("guest gone, supervisor loop exiting");
                return Ok(());
            };

            let response = match self.handle(&notif) {
                Ok(response) => response,
                Err(err) => {
                    tracing::error!(%err, nr = notif.nr, "fatal supervisor error");
                    return Err(err);
                }
            };
            notifier.send(notif.id, response)?;
        }
    }
}
