//! Process identification.
//!
//! Maps a pid file descriptor to the owning (application, instance).
//! The pidfd indirection is mandatory: a plain pid from the caller could
//! have been reused by the time it is looked at. The peer pid is read
//! from the descriptor's fdinfo entry, then pluggable strategies resolve
//! it, normally through the process's cgroup leaf unit name, with an
//! ancestor walk as fallback for processes the app forked itself.

use crate::error::LaunchdError;
use capy_systemd::UnitIdentity;
use capy_systemd::unit_name;
use log::warn;
use std::os::fd::RawFd;

/// One way of mapping a pid to its unit identity.
pub trait IdentifyStrategy: Send + Sync {
    fn identify(&self, pid: u32) -> Option<UnitIdentity>;
}

/// Reads `/proc/<pid>/cgroup` and decodes the leaf unit name.
pub struct CgroupStrategy;

impl IdentifyStrategy for CgroupStrategy {
    fn identify(&self, pid: u32) -> Option<UnitIdentity> {
        let content = std::fs::read_to_string(format!("/proc/{pid}/cgroup")).ok()?;
        identity_from_cgroup(&content)
    }
}

/// Climbs parent links until some ancestor's cgroup resolves.
pub struct AncestorWalkStrategy {
    max_hops: usize,
}

impl AncestorWalkStrategy {
    pub fn new(max_hops: usize) -> Self {
        Self { max_hops }
    }

    fn parent_of(pid: u32) -> Option<u32> {
        let content = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
        parse_parent_pid(&content)
    }
}

impl IdentifyStrategy for AncestorWalkStrategy {
    fn identify(&self, pid: u32) -> Option<UnitIdentity> {
        let mut current = pid;
        for _ in 0..self.max_hops {
            current = Self::parent_of(current)?;
            if current <= 1 {
                return None;
            }
            if let Some(identity) = CgroupStrategy.identify(current) {
                return Some(identity);
            }
        }
        None
    }
}

pub struct Identifier {
    strategies: Vec<Box<dyn IdentifyStrategy>>,
}

impl Default for Identifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Identifier {
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(CgroupStrategy),
                Box::new(AncestorWalkStrategy::new(16)),
            ],
        }
    }

    /// Resolve the peer pid of a pidfd via its fdinfo entry.
    pub fn pid_from_pidfd(fd: RawFd) -> Result<u32, LaunchdError> {
        let content = std::fs::read_to_string(format!("/proc/self/fdinfo/{fd}"))?;
        parse_fdinfo_pid(&content).ok_or_else(|| {
            warn!("pidfd {fd} refers to no live process");
            LaunchdError::NotFound("process behind pidfd".to_string())
        })
    }

    pub fn identify(&self, pid: u32) -> Option<UnitIdentity> {
        self.strategies
            .iter()
            .find_map(|strategy| strategy.identify(pid))
    }
}

/// Extract the `Pid:` line of a pidfd fdinfo entry. A dead peer shows -1.
pub(crate) fn parse_fdinfo_pid(content: &str) -> Option<u32> {
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("Pid:") {
            let value: i64 = rest.trim().parse().ok()?;
            return u32::try_from(value).ok().filter(|pid| *pid > 0);
        }
    }
    None
}

/// Extract the `PPid:` line of a process status file.
pub(crate) fn parse_parent_pid(content: &str) -> Option<u32> {
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("PPid:") {
            return rest.trim().parse().ok();
        }
    }
    None
}

/// Find a decodable unit name among the leaf segments of a cgroup file.
pub(crate) fn identity_from_cgroup(content: &str) -> Option<UnitIdentity> {
    for line in content.lines() {
        // hierarchy-ID:controller-list:cgroup-path
        let Some(path) = line.splitn(3, ':').nth(2) else {
            continue;
        };
        let leaf = path.rsplit('/').next().unwrap_or(path);
        // Session and init scopes would decode as nonsense app ids.
        if !leaf.starts_with("app-") {
            continue;
        }
        if let Some(identity) = unit_name::decode(leaf) {
            if !identity.app_id.is_empty() {
                return Some(identity);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const FDINFO: &str = "\
pos:	0
flags:	02000002
mnt_id:	14
ino:	10515
Pid:	4242
NSpid:	4242
";

    #[test]
    fn fdinfo_pid_is_extracted() {
        assert_eq!(parse_fdinfo_pid(FDINFO), Some(4242));
    }

    #[test]
    fn dead_peer_yields_none() {
        assert_eq!(parse_fdinfo_pid("pos:\t0\nPid:\t-1\n"), None);
        assert_eq!(parse_fdinfo_pid("pos:\t0\n"), None);
    }

    #[test]
    fn parent_pid_is_extracted() {
        let status = "Name:\tedit\nPid:\t4242\nPPid:\t4100\n";
        assert_eq!(parse_parent_pid(status), Some(4100));
    }

    #[test]
    fn cgroup_leaf_unit_resolves_to_identity() {
        let cgroup = "0::/user.slice/user-1000.slice/user@1000.service/app.slice/app-capyshell-org\\x2eexample\\x2eEdit@u1.service\n";
        let identity = identity_from_cgroup(cgroup).unwrap();
        assert_eq!(identity.app_id, "org.example.Edit");
        assert_eq!(identity.instance_id, "u1");
    }

    #[test]
    fn scope_leaves_resolve_too() {
        let cgroup = "0::/user.slice/app-org\\x2eexample\\x2eEdit-deadbeef.scope\n";
        let identity = identity_from_cgroup(cgroup).unwrap();
        assert_eq!(identity.app_id, "org.example.Edit");
        assert_eq!(identity.instance_id, "deadbeef");
    }

    #[test]
    fn non_unit_cgroups_yield_none() {
        assert_eq!(identity_from_cgroup("0::/user.slice/session-2.scope\n"), None);
        assert_eq!(identity_from_cgroup("0::/init.scope\n"), None);
        assert_eq!(identity_from_cgroup("garbage"), None);
    }
}
