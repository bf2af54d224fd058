//! Resource guard (C1): verify/raise per-process FD and kernel inotify
//! limits before tailing `N` paths.
//!
//! FD limits go through `nix::sys::resource` (the teacher's own tree has no
//! rlimit dependency; this crate reaches for it the way the rest of the
//! example pack does). inotify quotas are plain `/proc/sys/fs/inotify/*`
//! reads/writes, avoiding a `sysctl` subprocess dependency.

use std::fs;
use std::io::Write as _;

use nix::sys::resource::{getrlimit, setrlimit, Resource};

use crate::error::{LogifyError, Result};

const INSTANCES_PATH: &str = "/proc/sys/fs/inotify/max_user_instances";
const WATCHES_PATH: &str = "/proc/sys/fs/inotify/max_user_watches";
const SYSCTL_CONF: &str = "/etc/sysctl.conf";

fn fd_floor(n: usize) -> u64 {
    (2 * n + 100) as u64
}

fn instances_floor(n: usize) -> u64 {
    (n / 10 + 1) as u64
}

fn watches_floor(n: usize) -> u64 {
    (2 * n) as u64
}

fn privileged_fd_target(needed: u64) -> u64 {
    needed.max(65536)
}

fn privileged_instances_target(needed: u64) -> u64 {
    needed.max(1024).max(needed * 2)
}

fn privileged_watches_target(needed: u64) -> u64 {
    needed.max(524288).max(needed * 2)
}

fn is_privileged() -> bool {
    nix::unistd::geteuid().is_root()
}

fn read_proc_value(path: &str) -> Result<u64> {
    let text = fs::read_to_string(path).map_err(|e| LogifyError::ResourceLimit {
        detail: format!("reading {path}: {e}"),
    })?;
    text.trim().parse::<u64>().map_err(|e| LogifyError::ResourceLimit {
        detail: format!("parsing {path}: {e}"),
    })
}

fn write_proc_value(path: &str, value: u64) -> Result<()> {
    fs::write(path, value.to_string()).map_err(|e| LogifyError::ResourceLimit {
        detail: format!("writing {path}: {e}"),
    })
}

fn persist_sysctl(key: &str, value: u64) {
    if let Ok(mut f) = fs::OpenOptions::new().create(true).append(true).open(SYSCTL_CONF) {
        let _ = writeln!(f, "{key} = {value}");
    }
}

/// Ensure the current process can safely tail `n` paths: raise the soft FD
/// limit and the kernel inotify quotas when they fall short, escalating to
/// system-wide targets when privileged. Fails closed with
/// [`LogifyError::ResourceLimit`] rather than proceeding under-provisioned.
pub fn ensure_capacity(n: usize) -> Result<()> {
    ensure_fd_limit(n)?;
    ensure_inotify_limits(n)?;
    Ok(())
}

fn ensure_fd_limit(n: usize) -> Result<()> {
    let needed = fd_floor(n);
    let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE).map_err(|e| LogifyError::ResourceLimit {
        detail: format!("getrlimit(NOFILE): {e}"),
    })?;

    if soft >= needed {
        return Ok(());
    }

    let privileged = is_privileged();
    let target = if privileged {
        privileged_fd_target(needed)
    } else {
        needed.min(hard)
    };

    if target > hard && !privileged {
        return Err(LogifyError::ResourceLimit {
            detail: format!(
                "soft NOFILE limit {soft} below required {needed} and hard limit {hard} cannot be raised without elevated privileges; run as root or raise `ulimit -n` to at least {needed}"
            ),
        });
    }

    let new_hard = hard.max(target);
    setrlimit(Resource::RLIMIT_NOFILE, target, new_hard).map_err(|e| LogifyError::ResourceLimit {
        detail: format!("setrlimit(NOFILE, {target}, {new_hard}): {e}"),
    })?;
    Ok(())
}

fn ensure_inotify_limits(n: usize) -> Result<()> {
    let needed_instances = instances_floor(n);
    let needed_watches = watches_floor(n);

    let instances = read_proc_value(INSTANCES_PATH)?;
    let watches = read_proc_value(WATCHES_PATH)?;

    let instances_ok = instances >= needed_instances;
    let watches_ok = watches >= needed_watches;
    if instances_ok && watches_ok {
        return Ok(());
    }

    if !is_privileged() {
        let mut missing = Vec::new();
        if !instances_ok {
            missing.push(format!(
                "fs.inotify.max_user_instances = {needed_instances} (current {instances})"
            ));
        }
        if !watches_ok {
            missing.push(format!(
                "fs.inotify.max_user_watches = {needed_watches} (current {watches})"
            ));
        }
        return Err(LogifyError::ResourceLimit {
            detail: format!(
                "insufficient inotify quota and not privileged to raise it; set: {}",
                missing.join(", ")
            ),
        });
    }

    if !instances_ok {
        let target = privileged_instances_target(needed_instances);
        write_proc_value(INSTANCES_PATH, target)?;
        persist_sysctl("fs.inotify.max_user_instances", target);
    }
    if !watches_ok {
        let target = privileged_watches_target(needed_watches);
        write_proc_value(WATCHES_PATH, target)?;
        persist_sysctl("fs.inotify.max_user_watches", target);
    }
    Ok(())
}
