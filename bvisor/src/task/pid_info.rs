//! Kernel-side thread information.
//!
//! The registry reconciles its model against what the kernel actually knows:
//! which tids are alive, who their parents are, and how their pid-namespace
//! chains look. That lookup sits behind a trait so handler and registry
//! logic can run against a static table in tests.

use std::fs;
use std::path::Path;

use crate::ids::{AbsTgid, AbsTid, NsTid};
use bvisor_shared::errors::{BvisorError, BvisorResult};

/// What the kernel reports about one thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidStatus {
    pub tgid: AbsTgid,
    pub parent: AbsTid,
    /// NsTid per namespace level, outermost first.
    pub ns_tids: Vec<NsTid>,
}

pub trait PidInfo: Send + Sync {
    fn status(&self, tid: AbsTid) -> BvisorResult<PidStatus>;
    fn live_tids(&self) -> BvisorResult<Vec<AbsTid>>;
}

/// Reads `/proc/<tid>/status`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcPidInfo;

impl ProcPidInfo {
    pub fn new() -> Self {
        ProcPidInfo
    }
}

impl PidInfo for ProcPidInfo {
    fn status(&self, tid: AbsTid) -> BvisorResult<PidStatus> {
        let path = format!("/proc/{}/status", tid.0);
        let text = fs::read_to_string(&path)
            .map_err(|_| BvisorError::NotFound(format!("no kernel thread {}", tid)))?;
        parse_status(tid, &text)
    }

    fn live_tids(&self) -> BvisorResult<Vec<AbsTid>> {
        let mut tids = Vec::new();
        for entry in fs::read_dir("/proc").map_err(BvisorError::from)? {
            let entry = entry.map_err(BvisorError::from)?;
            let Some(pid) = numeric_name(&entry.file_name()) else {
                continue;
            };
            // Each process directory lists its threads under task/.
            let task_dir = Path::new("/proc").join(pid.to_string()).join("task");
            let Ok(tasks) = fs::read_dir(task_dir) else {
                continue;
            };
            for task in tasks.flatten() {
                if let Some(tid) = numeric_name(&task.file_name()) {
                    tids.push(AbsTid(tid));
                }
            }
        }
        Ok(tids)
    }
}

fn numeric_name(name: &std::ffi::OsStr) -> Option<i32> {
    name.to_str()?.parse::<i32>().ok()
}

/// Parse the Tgid/PPid/NSpid lines out of a /proc status file.
fn parse_status(tid: AbsTid, text: &str) -> BvisorResult<PidStatus> {
    let mut tgid: Option<i32> = None;
    let mut parent: Option<i32> = None;
    let mut ns_tids: Vec<NsTid> = Vec::new();

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("Tgid:") {
            tgid = rest.trim().parse().ok();
        } else if let Some(rest) = line.strip_prefix("PPid:") {
            parent = rest.trim().parse().ok();
        } else if let Some(rest) = line.strip_prefix("NSpid:") {
            ns_tids = rest
                .split_whitespace()
                .filter_map(|v| v.parse().ok())
                .map(NsTid)
                .collect();
        }
    }

    let tgid = tgid
        .ok_or_else(|| BvisorError::Internal(format!("no Tgid line for thread {}", tid)))?;
    let parent = parent
        .ok_or_else(|| BvisorError::Internal(format!("no PPid line for thread {}", tid)))?;
    if ns_tids.is_empty() {
        // Pre-4.1 kernels have no NSpid line; the thread then lives in the
        // initial namespace only.
        ns_tids.push(NsTid(tid.0));
    }

    Ok(PidStatus {
        tgid: AbsTgid(tgid),
        parent: AbsTid(parent),
        ns_tids,
    })
}

/// In-memory pid table for tests and single-process use.
///
/// Clones share the underlying table, so a test can keep one handle and
/// mutate what the registry sees mid-run.
#[derive(Debug, Default, Clone)]
pub struct StaticPidInfo {
    inner: std::sync::Arc<parking_lot::Mutex<std::collections::HashMap<i32, PidStatus>>>,
}

impl StaticPidInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tid: AbsTid, status: PidStatus) {
        self.inner.lock().insert(tid.0, status);
    }

    pub fn remove(&self, tid: AbsTid) {
        self.inner.lock().remove(&tid.0);
    }
}

impl PidInfo for StaticPidInfo {
    fn status(&self, tid: AbsTid) -> BvisorResult<PidStatus> {
        self.inner
            .lock()
            .get(&tid.0)
            .cloned()
            .ok_or_else(|| BvisorError::NotFound(format!("no kernel thread {}", tid)))
    }

    fn live_tids(&self) -> BvisorResult<Vec<AbsTid>> {
        Ok(self.inner.lock().keys().map(|t| AbsTid(*t)).collect())
    }
}
