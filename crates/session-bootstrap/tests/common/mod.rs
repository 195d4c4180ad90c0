//! Shared fakes for bootstrap scenario tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt::Arguments;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use session_bootstrap::config::{BootstrapConfig, Readiness};
use session_bootstrap::daemon::{ChildSpec, Launcher};
use session_bootstrap::diag::{Diagnostics, Level};
use session_bootstrap::error::{BootstrapError, BootstrapResult};
use session_bootstrap::identity::{GroupEntry, IdentityDatabase, PasswdEntry};
use session_bootstrap::privilege::{PrivilegeOps, ProcessIds};
use session_bootstrap::session::{SessionDetector, SessionProbe};

pub const VIDEO_GID: u32 = 44;
pub const RENDER_GID: u32 = 109;

/// Stand-in for the whole host: user database, identity syscalls, process
/// table and launcher, all recording into one ordered event log.
pub struct FakeHost {
    pub users: Vec<PasswdEntry>,
    pub groups: Vec<GroupEntry>,
    pub events: RefCell<Vec<String>>,
    pub launched: RefCell<Vec<ChildSpec>>,
    /// uids with a display running.
    pub running: RefCell<HashSet<u32>>,
    /// Operation name that fails with EPERM.
    pub fail_at: Option<&'static str>,
    /// Make the process table query fail.
    pub probe_fails: bool,
    /// Create the screen file when a display is launched.
    pub display_writes_screen: bool,
    pub ids: RefCell<ProcessIds>,
}

impl FakeHost {
    /// Host with alice (1000) in video and render, and bob (1001) in video.
    pub fn new() -> Self {
        Self {
            users: vec![
                PasswdEntry {
                    name: "alice".to_string(),
                    uid: 1000,
                    gid: 1000,
                    home_dir: PathBuf::from("/home/alice"),
                },
                PasswdEntry {
                    name: "bob".to_string(),
                    uid: 1001,
                    gid: 1001,
                    home_dir: PathBuf::from("/home/bob"),
                },
            ],
            groups: vec![
                GroupEntry {
                    name: "video".to_string(),
                    gid: VIDEO_GID,
                    members: vec!["alice".to_string(), "bob".to_string()],
                },
                GroupEntry {
                    name: "render".to_string(),
                    gid: RENDER_GID,
                    members: vec!["alice".to_string()],
                },
                GroupEntry {
                    name: "alice".to_string(),
                    gid: 1000,
                    members: Vec::new(),
                },
            ],
            events: RefCell::new(Vec::new()),
            launched: RefCell::new(Vec::new()),
            running: RefCell::new(HashSet::new()),
            fail_at: None,
            probe_fails: false,
            display_writes_screen: false,
            ids: RefCell::new(ProcessIds {
                uid: 0,
                euid: 0,
                gid: 0,
                egid: 0,
            }),
        }
    }

    pub fn failing(step: &'static str) -> Self {
        Self {
            fail_at: Some(step),
            ..Self::new()
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }

    pub fn launched(&self) -> Vec<ChildSpec> {
        self.launched.borrow().clone()
    }

    pub fn launched_programs(&self) -> Vec<String> {
        self.launched
            .borrow()
            .iter()
            .map(|spec| spec.program().to_string())
            .collect()
    }

    fn record(&self, name: &'static str, detail: String) -> io::Result<()> {
        self.events.borrow_mut().push(format!("{name} {detail}"));
        if self.fail_at == Some(name) {
            return Err(io::Error::from_raw_os_error(libc::EPERM));
        }
        Ok(())
    }
}

impl IdentityDatabase for FakeHost {
    fn user(&self, username: &str) -> BootstrapResult<Option<PasswdEntry>> {
        Ok(self.users.iter().find(|u| u.name == username).cloned())
    }

    fn groups(&self) -> BootstrapResult<Vec<GroupEntry>> {
        Ok(self.groups.clone())
    }
}

impl PrivilegeOps for FakeHost {
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        self.record("chown", format!("{} {uid}:{gid}", path.display()))
    }

    fn set_groups(&self, gids: &[u32]) -> io::Result<()> {
        self.record("setgroups", format!("{gids:?}"))
    }

    fn set_gid(&self, gid: u32) -> io::Result<()> {
        self.record("setgid", gid.to_string())?;
        let mut ids = self.ids.borrow_mut();
        ids.gid = gid;
        ids.egid = gid;
        Ok(())
    }

    fn set_uid(&self, uid: u32) -> io::Result<()> {
        self.record("setuid", uid.to_string())?;
        let mut ids = self.ids.borrow_mut();
        ids.uid = uid;
        ids.euid = uid;
        Ok(())
    }

    fn change_dir(&self, dir: &Path) -> io::Result<()> {
        self.record("chdir", dir.display().to_string())
    }

    fn current_ids(&self) -> ProcessIds {
        *self.ids.borrow()
    }
}

impl SessionDetector for FakeHost {
    fn probe(&self, uid: u32) -> SessionProbe {
        self.events.borrow_mut().push(format!("probe {uid}"));
        if self.probe_fails {
            return SessionProbe::QueryFailed("process table unavailable".to_string());
        }
        if self.running.borrow().contains(&uid) {
            SessionProbe::Present(vec![4242])
        } else {
            SessionProbe::Absent
        }
    }
}

impl Launcher for FakeHost {
    fn detach(&self, spec: &ChildSpec) -> BootstrapResult<()> {
        let display = spec.env.get("DISPLAY").cloned().unwrap_or_default();
        self.record("detach", format!("{} DISPLAY={display}", spec.program()))
            .map_err(|source| BootstrapError::Launch {
                program: spec.program().to_string(),
                source,
            })?;
        self.launched.borrow_mut().push(spec.clone());

        if spec.program().ends_with("xinit") {
            if let Ok(uid) = display.trim_start_matches(':').parse::<u32>() {
                self.running.borrow_mut().insert(uid);
            }
            if self.display_writes_screen {
                let dir = arg_after(spec, "-fbdir").expect("display argv has -fbdir");
                std::fs::write(Path::new(&dir).join("Xvfb_screen0"), b"")
                    .expect("writing fake framebuffer");
            }
        }
        Ok(())
    }
}

/// Value following `flag` in the spec's argv.
pub fn arg_after(spec: &ChildSpec, flag: &str) -> Option<String> {
    let idx = spec.argv.iter().position(|a| a == flag)?;
    spec.argv.get(idx + 1).cloned()
}

/// Diagnostics sink that keeps every message.
#[derive(Default)]
pub struct RecordingDiagnostics {
    pub messages: Mutex<Vec<(Level, String)>>,
}

impl RecordingDiagnostics {
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .any(|(l, m)| *l == level && m.contains(needle))
    }
}

impl Diagnostics for RecordingDiagnostics {
    fn emit(&self, level: Level, args: Arguments<'_>) {
        self.messages.lock().unwrap().push((level, args.to_string()));
    }
}

/// Default config with scratch dirs under `scratch_root` and no settle delay.
pub fn test_config(scratch_root: &Path) -> BootstrapConfig {
    let mut config = BootstrapConfig::default();
    config.session.scratch_root = scratch_root.to_path_buf();
    config.readiness = Readiness::Fixed { settle_ms: 0 };
    config
}
