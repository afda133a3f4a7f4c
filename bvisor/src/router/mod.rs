//! Path router: normalised guest path -> routing verdict.
//!
//! An ordered prefix-rule table decides how a path-taking syscall is served.
//! The longest matching prefix wins; equal lengths resolve in declaration
//! order. Because matching happens after lexical normalisation, `..`
//! traversal cannot smuggle a blocked subtree through an allowed prefix.

mod normalize;

pub use normalize::normalize;

use crate::ids::NsTgid;

/// Which synthetic /proc file a `Verdict::Proc` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcKind {
    /// `/proc/self`
    SelfPid,
    /// `/proc/<pid>` with a namespaced pid as written by the guest.
    Pid(NsTgid),
}

/// Routing decision for one normalised absolute path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Refuse with EPERM.
    Block,
    /// Open via the real kernel, wrap in a passthrough backend.
    Passthrough,
    /// Synthesise a /proc file of the given kind.
    Proc(ProcKind),
    /// Open under the overlay's tmp/ subtree.
    Tmp,
    /// Default: copy-on-write against the host filesystem.
    Cow,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Block => "block",
            Verdict::Passthrough => "passthrough",
            Verdict::Proc(_) => "proc",
            Verdict::Tmp => "tmp",
            Verdict::Cow => "cow",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RuleAction {
    Block,
    Passthrough,
    Proc,
    Tmp,
}

struct PrefixRule {
    prefix: &'static str,
    action: RuleAction,
}

/// Ordered rule table. Longest prefix wins, so the /dev device nodes beat
/// the blanket /dev block.
const RULES: &[PrefixRule] = &[
    PrefixRule { prefix: "/sys", action: RuleAction::Block },
    PrefixRule { prefix: "/run", action: RuleAction::Block },
    PrefixRule { prefix: "/proc", action: RuleAction::Proc },
    PrefixRule { prefix: "/tmp", action: RuleAction::Tmp },
    PrefixRule { prefix: "/dev", action: RuleAction::Block },
    PrefixRule { prefix: "/dev/null", action: RuleAction::Passthrough },
    PrefixRule { prefix: "/dev/zero", action: RuleAction::Passthrough },
    PrefixRule { prefix: "/dev/random", action: RuleAction::Passthrough },
    PrefixRule { prefix: "/dev/urandom", action: RuleAction::Passthrough },
];

/// Component-wise prefix test: "/sys" matches "/sys" and "/sys/x" but not
/// "/sysfoo".
fn matches_prefix(path: &str, prefix: &str) -> bool {
    path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}

/// Route a normalised absolute path to a verdict.
pub fn route(path: &str) -> Verdict {
    let mut best: Option<&PrefixRule> = None;
    for rule in RULES {
        if matches_prefix(path, rule.prefix) {
            // Strictly-longer replaces; equal length keeps the earlier rule.
            if best.is_none_or(|b| rule.prefix.len() > b.prefix.len()) {
                best = Some(rule);
            }
        }
    }

    match best.map(|r| r.action) {
        None => Verdict::Cow,
        Some(RuleAction::Block) => Verdict::Block,
        Some(RuleAction::Passthrough) => Verdict::Passthrough,
        Some(RuleAction::Tmp) => Verdict::Tmp,
        Some(RuleAction::Proc) => route_proc(path),
    }
}

/// Only `/proc/self` and `/proc/<pid>` are synthesised. Everything else
/// under /proc exposes host state and is blocked.
fn route_proc(path: &str) -> Verdict {
    let rest = match path.strip_prefix("/proc") {
        Some(r) => r,
        None => return Verdict::Block,
    };
    match rest {
        "/self" => Verdict::Proc(ProcKind::SelfPid),
        _ => {
            let candidate = rest.strip_prefix('/').unwrap_or("");
            if !candidate.is_empty() && candidate.bytes().all(|b| b.is_ascii_digit()) {
                match candidate.parse::<i32>() {
                    Ok(pid) => Verdict::Proc(ProcKind::Pid(NsTgid(pid))),
                    Err(_) => Verdict::Block,
                }
            } else {
                Verdict::Block
            }
        }
    }
}
