//! session-bootstrap - start a user's virtual display and video server.
//!
//! ## Usage
//!
//! ```bash
//! # As root, after the broker has created the socket
//! session-bootstrap alice /run/sanzu/alice.sock
//!
//! # Show the effective configuration
//! session-bootstrap --print-config alice /run/sanzu/alice.sock
//! ```
//!
//! The process must stay single-threaded: it forks after dropping privileges.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use session_bootstrap::config::DEFAULT_CONFIG_PATH;
use session_bootstrap::daemon::DoubleForkLauncher;
use session_bootstrap::diag::{Diagnostics, LogDiagnostics};
use session_bootstrap::identity;
use session_bootstrap::privilege::SystemPrivileges;
use session_bootstrap::session::PgrepDetector;
use session_bootstrap::{Bootstrap, BootstrapConfig};

#[derive(Parser, Debug)]
#[command(
    name = "session-bootstrap",
    version,
    about = "Drop to a user, ensure their virtual display runs, and start the video server"
)]
struct Args {
    /// User to run the session as
    username: String,

    /// Pre-created unix socket the video server will serve on
    handoff: PathBuf,

    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to config file
    #[arg(
        short,
        long,
        value_name = "PATH",
        default_value = DEFAULT_CONFIG_PATH,
        env = "SESSION_BOOTSTRAP_CONFIG"
    )]
    config: PathBuf,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "Error: {err:?}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn try_main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = BootstrapConfig::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let diag: Arc<dyn Diagnostics> = Arc::new(LogDiagnostics::default());
    let users = identity::database_from_config(&config.identity, diag.clone());
    let sessions = PgrepDetector::new(&config.session.pgrep_path, &config.session.process_name);
    let launcher = DoubleForkLauncher::new(diag.clone());

    let bootstrap = Bootstrap::new(
        &config,
        users.as_ref(),
        &SystemPrivileges,
        &sessions,
        &launcher,
        diag,
    );

    bootstrap
        .run(&args.username, &args.handoff)
        .with_context(|| format!("bootstrapping session for {}", args.username))?;

    Ok(())
}
