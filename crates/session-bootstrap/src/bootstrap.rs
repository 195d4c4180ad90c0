//! End-to-end session bootstrap.
//!
//! Runs once, top to bottom:
//!
//! ```text
//! Start -> IdentityResolved -> HandoffOwnershipTransferred -> PrivilegeDropped
//!   -> EnvironmentPrepared -> SessionChecked -> {DisplayLaunched | DisplaySkipped}
//!   -> StreamingServerLaunched -> Done
//! ```
//!
//! Any error aborts the run. Nothing is retried and nothing launched earlier
//! is cleaned up.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::command::LaunchPlan;
use crate::config::{BootstrapConfig, Readiness};
use crate::daemon::Launcher;
use crate::diag::Diagnostics;
use crate::error::BootstrapResult;
use crate::identity::{self, Identity, IdentityDatabase};
use crate::privilege::{self, PrivilegeOps};
use crate::session::{SessionDetector, SessionLayout};
use crate::{diag_debug, diag_info, diag_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    IdentityResolved,
    HandoffOwnershipTransferred,
    PrivilegeDropped,
    EnvironmentPrepared,
    SessionChecked,
    DisplayLaunched,
    DisplaySkipped,
    StreamingServerLaunched,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What happened to the display on this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayDecision {
    Launched,
    /// A display for the uid was already running.
    Skipped,
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct BootstrapReport {
    pub identity: Identity,
    pub layout: SessionLayout,
    pub display: DisplayDecision,
    pub stages: Vec<Stage>,
}

pub struct Bootstrap<'a> {
    config: &'a BootstrapConfig,
    users: &'a dyn IdentityDatabase,
    privileges: &'a dyn PrivilegeOps,
    sessions: &'a dyn SessionDetector,
    launcher: &'a dyn Launcher,
    diag: Arc<dyn Diagnostics>,
}

impl<'a> Bootstrap<'a> {
    pub fn new(
        config: &'a BootstrapConfig,
        users: &'a dyn IdentityDatabase,
        privileges: &'a dyn PrivilegeOps,
        sessions: &'a dyn SessionDetector,
        launcher: &'a dyn Launcher,
        diag: Arc<dyn Diagnostics>,
    ) -> Self {
        Self {
            config,
            users,
            privileges,
            sessions,
            launcher,
            diag,
        }
    }

    /// Bootstrap the session for `username`, serving on `handoff`.
    pub fn run(&self, username: &str, handoff: &Path) -> BootstrapResult<BootstrapReport> {
        let mut stages = vec![Stage::Start];
        let mut advance = |stage: Stage| {
            diag_debug!(self.diag, "stage: {}", stage);
            stages.push(stage);
        };

        let identity = identity::resolve(self.users, username)?;
        diag_info!(
            self.diag,
            "user {}: uid {} gid {} groups {:?}",
            identity.username,
            identity.uid,
            identity.gid,
            identity.supplementary_gids
        );
        advance(Stage::IdentityResolved);

        diag_debug!(self.diag, "handing {} to {}", handoff.display(), identity.username);
        privilege::transfer_ownership(self.privileges, handoff, &identity)?;
        advance(Stage::HandoffOwnershipTransferred);

        privilege::drop_privileges(self.privileges, &identity)?;
        diag_debug!(self.diag, "now running as uid {}", identity.uid);
        advance(Stage::PrivilegeDropped);

        let layout = SessionLayout::new(&self.config.session.scratch_root, identity.uid);
        let plan = LaunchPlan::new(self.config, &identity, &layout, handoff);
        advance(Stage::EnvironmentPrepared);

        let running = self.sessions.probe(identity.uid).fail_open(self.diag.as_ref());
        advance(Stage::SessionChecked);

        let display = if running {
            diag_info!(
                self.diag,
                "display {} already running, not starting another",
                identity.display_name()
            );
            advance(Stage::DisplaySkipped);
            DisplayDecision::Skipped
        } else {
            diag_info!(self.diag, "starting display {}", identity.display_name());
            layout.ensure_scratch_dir(self.diag.as_ref())?;
            self.launcher.detach(&plan.display)?;
            self.wait_for_display(&layout);
            advance(Stage::DisplayLaunched);
            DisplayDecision::Launched
        };

        diag_info!(self.diag, "starting video server on {}", handoff.display());
        self.launcher.detach(&plan.server)?;
        advance(Stage::StreamingServerLaunched);

        diag_info!(
            self.diag,
            "session for {} ready (display {}, {})",
            identity.username,
            identity.display_name(),
            match display {
                DisplayDecision::Launched => "started",
                DisplayDecision::Skipped => "already running",
            }
        );
        advance(Stage::Done);

        Ok(BootstrapReport {
            identity,
            layout,
            display,
            stages,
        })
    }

    /// Give the new display a head start. Not a readiness guarantee.
    fn wait_for_display(&self, layout: &SessionLayout) {
        match self.config.readiness {
            Readiness::Fixed { settle_ms } => {
                thread::sleep(Duration::from_millis(settle_ms));
            }
            Readiness::Poll {
                interval_ms,
                attempts,
            } => {
                for attempt in 1..=attempts {
                    if layout.screen_path.exists() {
                        diag_debug!(
                            self.diag,
                            "{} appeared after {} checks",
                            layout.screen_path.display(),
                            attempt
                        );
                        return;
                    }
                    thread::sleep(Duration::from_millis(interval_ms));
                }
                diag_warn!(
                    self.diag,
                    "{} did not appear after {} checks, continuing anyway",
                    layout.screen_path.display(),
                    attempts
                );
            }
        }
    }
}
