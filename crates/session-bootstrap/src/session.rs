//! Display session detection and the per-uid scratch layout.
//!
//! There is no session registry. A session "exists" when the process table
//! shows a display multiplexer owned by the uid at the moment we look, so the
//! answer can be stale by the time it is acted on.

use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::diag::Diagnostics;
use crate::error::{BootstrapError, BootstrapResult};
use crate::{diag_debug, diag_warn};

/// File name Xvfb uses for screen 0 under `-fbdir`.
pub const SCREEN_FILE: &str = "Xvfb_screen0";

/// `pgrep` exit status meaning "no process matched".
const PGREP_NO_MATCH: i32 = 1;

/// Outcome of one process table query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionProbe {
    /// Matching processes, by pid.
    Present(Vec<u32>),
    Absent,
    /// The query itself did not produce a usable answer.
    QueryFailed(String),
}

impl SessionProbe {
    /// Fold the probe into "is a session running".
    ///
    /// A failed query counts as "no session". This can start a second display
    /// for the same uid if the process table is unreadable, so the fold is
    /// logged loudly.
    pub fn fail_open(self, diag: &dyn Diagnostics) -> bool {
        match self {
            Self::Present(pids) => {
                diag_debug!(diag, "display session running (pids {:?})", pids);
                true
            }
            Self::Absent => false,
            Self::QueryFailed(reason) => {
                diag_warn!(
                    diag,
                    "session query failed ({}), assuming no display is running",
                    reason
                );
                false
            }
        }
    }
}

/// Looks for a running display session owned by a uid.
pub trait SessionDetector {
    fn probe(&self, uid: u32) -> SessionProbe;
}

/// Queries the process table through `pgrep -u <uid> <name>`.
#[derive(Debug, Clone)]
pub struct PgrepDetector {
    program: PathBuf,
    process_name: String,
}

impl PgrepDetector {
    pub fn new(program: impl AsRef<Path>, process_name: impl Into<String>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            process_name: process_name.into(),
        }
    }
}

impl SessionDetector for PgrepDetector {
    fn probe(&self, uid: u32) -> SessionProbe {
        let output = Command::new(&self.program)
            .arg("-u")
            .arg(uid.to_string())
            .arg(&self.process_name)
            .stdin(Stdio::null())
            .output();

        match output {
            Ok(out) => interpret_pgrep(out.status.code(), &String::from_utf8_lossy(&out.stdout)),
            Err(e) => SessionProbe::QueryFailed(format!(
                "running {}: {e}",
                self.program.display()
            )),
        }
    }
}

/// Map a `pgrep` exit status and stdout to a probe result.
pub fn interpret_pgrep(code: Option<i32>, stdout: &str) -> SessionProbe {
    match code {
        Some(0) => {
            let pids: Vec<u32> = stdout
                .lines()
                .filter_map(|line| line.trim().parse().ok())
                .collect();
            if pids.is_empty() {
                SessionProbe::QueryFailed("pgrep reported a match but printed no pids".to_string())
            } else {
                SessionProbe::Present(pids)
            }
        }
        Some(PGREP_NO_MATCH) => SessionProbe::Absent,
        Some(code) => SessionProbe::QueryFailed(format!("pgrep exited with status {code}")),
        None => SessionProbe::QueryFailed("pgrep killed by signal".to_string()),
    }
}

/// Where a uid's display keeps its framebuffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    pub scratch_dir: PathBuf,
    pub screen_path: PathBuf,
}

impl SessionLayout {
    pub fn new(scratch_root: &Path, uid: u32) -> Self {
        let scratch_dir = scratch_root.join(uid.to_string());
        let screen_path = scratch_dir.join(SCREEN_FILE);
        Self {
            scratch_dir,
            screen_path,
        }
    }

    /// Create the scratch directory if needed.
    ///
    /// An existing path is accepted when it resolves to a directory, symlinks
    /// included. A directory owned by another uid is used anyway with a
    /// warning. Anything else is fatal.
    pub fn ensure_scratch_dir(&self, diag: &dyn Diagnostics) -> BootstrapResult<()> {
        self.ensure_scratch_dir_as(rustix::process::geteuid().as_raw(), diag)
    }

    fn ensure_scratch_dir_as(&self, euid: u32, diag: &dyn Diagnostics) -> BootstrapResult<()> {
        let fail = |source| BootstrapError::ScratchDir {
            path: self.scratch_dir.clone(),
            source,
        };

        match fs::create_dir(&self.scratch_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let meta = fs::metadata(&self.scratch_dir).map_err(fail)?;
                if !meta.is_dir() {
                    return Err(fail(io::Error::other("exists and is not a directory")));
                }
                if meta.uid() != euid {
                    diag_warn!(
                        diag,
                        "{} is owned by uid {}, not {}; using it anyway",
                        self.scratch_dir.display(),
                        meta.uid(),
                        euid
                    );
                }
                Ok(())
            }
            Err(e) => Err(fail(e)),
        }
    }
}
