//! Ownership handoff and the irrevocable identity transition.
//!
//! The order is fixed: supplementary groups, then gid, then uid, then the
//! working directory. Each identity call needs privileges that the next one
//! gives up, so any other order fails part-way. There is no rollback: once a
//! step has applied, undoing it would need the privileges already surrendered.

use std::io;
use std::path::Path;

use crate::error::{BootstrapError, BootstrapResult, PrivilegeStep};
use crate::identity::Identity;

/// Real and effective ids of the running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessIds {
    pub uid: u32,
    pub euid: u32,
    pub gid: u32,
    pub egid: u32,
}

/// System calls that change who the process is.
pub trait PrivilegeOps {
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()>;
    fn set_groups(&self, gids: &[u32]) -> io::Result<()>;
    fn set_gid(&self, gid: u32) -> io::Result<()>;
    fn set_uid(&self, uid: u32) -> io::Result<()>;
    fn change_dir(&self, dir: &Path) -> io::Result<()>;
    fn current_ids(&self) -> ProcessIds;
}

/// The real thing.
///
/// The libc wrappers are used for the id changes because they apply them to
/// every thread of the process, not just the calling one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPrivileges;

fn check(ret: libc::c_int) -> io::Result<()> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

impl PrivilegeOps for SystemPrivileges {
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        std::os::unix::fs::chown(path, Some(uid), Some(gid))
    }

    fn set_groups(&self, gids: &[u32]) -> io::Result<()> {
        let gids: Vec<libc::gid_t> = gids.iter().map(|&g| g as libc::gid_t).collect();
        // SAFETY: pointer and length come from a live Vec.
        check(unsafe { libc::setgroups(gids.len() as _, gids.as_ptr()) })
    }

    fn set_gid(&self, gid: u32) -> io::Result<()> {
        // SAFETY: plain system call with no memory arguments.
        check(unsafe { libc::setgid(gid as libc::gid_t) })
    }

    fn set_uid(&self, uid: u32) -> io::Result<()> {
        // SAFETY: plain system call with no memory arguments.
        check(unsafe { libc::setuid(uid as libc::uid_t) })
    }

    fn change_dir(&self, dir: &Path) -> io::Result<()> {
        std::env::set_current_dir(dir)
    }

    fn current_ids(&self) -> ProcessIds {
        use rustix::process::{getegid, geteuid, getgid, getuid};
        ProcessIds {
            uid: getuid().as_raw(),
            euid: geteuid().as_raw(),
            gid: getgid().as_raw(),
            egid: getegid().as_raw(),
        }
    }
}

/// Hand the handoff resource over to the target identity.
///
/// Must run while still privileged; after [`drop_privileges`] the process can
/// no longer give files away.
pub fn transfer_ownership(
    ops: &dyn PrivilegeOps,
    path: &Path,
    identity: &Identity,
) -> BootstrapResult<()> {
    ops.chown(path, identity.uid, identity.gid)
        .map_err(|source| BootstrapError::OwnershipTransfer {
            path: path.to_path_buf(),
            uid: identity.uid,
            gid: identity.gid,
            source,
        })
}

/// Become `identity` for the rest of the process lifetime.
///
/// On error the process is in an unspecified partially-dropped state and
/// must not continue.
pub fn drop_privileges(ops: &dyn PrivilegeOps, identity: &Identity) -> BootstrapResult<()> {
    let fail = |step| move |source| BootstrapError::PrivilegeDrop { step, source };

    ops.set_groups(&identity.supplementary_gids)
        .map_err(fail(PrivilegeStep::SetGroups))?;
    ops.set_gid(identity.gid)
        .map_err(fail(PrivilegeStep::SetGid))?;
    ops.set_uid(identity.uid)
        .map_err(fail(PrivilegeStep::SetUid))?;
    ops.change_dir(&identity.home_dir)
        .map_err(fail(PrivilegeStep::ChangeDir))?;

    let ids = ops.current_ids();
    let expected = ProcessIds {
        uid: identity.uid,
        euid: identity.uid,
        gid: identity.gid,
        egid: identity.gid,
    };
    if ids != expected {
        return Err(BootstrapError::PrivilegeDrop {
            step: PrivilegeStep::Verify,
            source: io::Error::other(format!(
                "running as {ids:?} after transition, expected {expected:?}"
            )),
        });
    }

    Ok(())
}
