//! Argument templates for the display and streaming server, and the fixed
//! environment every child receives.

use std::collections::BTreeMap;
use std::path::Path;

use crate::config::{BootstrapConfig, ChildEnvConfig, DisplayConfig, ServerConfig};
use crate::daemon::ChildSpec;
use crate::identity::Identity;
use crate::session::SessionLayout;

/// Environment handed to every launched child. Nothing is inherited.
pub fn child_environment(identity: &Identity, env: &ChildEnvConfig) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("DISPLAY".to_string(), identity.display_name()),
        ("USERNAME".to_string(), identity.username.clone()),
        ("USER".to_string(), identity.username.clone()),
        (
            "HOME".to_string(),
            identity.home_dir.to_string_lossy().into_owned(),
        ),
        (env.log_var.clone(), env.log_level.clone()),
    ])
}

/// `xinit <script> -- Xvfb :<uid> -screen 0 <geometry> -fbdir <dir> -nocursor`
pub fn display_argv(display: &DisplayConfig, display_name: &str, layout: &SessionLayout) -> Vec<String> {
    vec![
        path_arg(&display.xinit_path),
        path_arg(&display.session_script),
        "--".to_string(),
        path_arg(&display.xvfb_path),
        display_name.to_string(),
        "-screen".to_string(),
        "0".to_string(),
        display.geometry.clone(),
        "-fbdir".to_string(),
        path_arg(&layout.scratch_dir),
        "-nocursor".to_string(),
    ]
}

/// Streaming server reading the framebuffer file and serving on the handoff socket.
pub fn server_argv(server: &ServerConfig, handoff: &Path, layout: &SessionLayout) -> Vec<String> {
    vec![
        path_arg(&server.binary),
        "-u".to_string(),
        "-c".to_string(),
        "-l".to_string(),
        path_arg(handoff),
        "-f".to_string(),
        path_arg(&server.config_path),
        "-a".to_string(),
        "-s".to_string(),
        "-e".to_string(),
        server.encoder.clone(),
        "-k".to_string(),
        path_arg(&layout.screen_path),
    ]
}

/// Both launch specs for one bootstrap run.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub display: ChildSpec,
    pub server: ChildSpec,
}

impl LaunchPlan {
    pub fn new(
        config: &BootstrapConfig,
        identity: &Identity,
        layout: &SessionLayout,
        handoff: &Path,
    ) -> Self {
        let env = child_environment(identity, &config.child_env);
        Self {
            display: ChildSpec::new(
                display_argv(&config.display, &identity.display_name(), layout),
                env.clone(),
            ),
            server: ChildSpec::new(server_argv(&config.server, handoff, layout), env),
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
