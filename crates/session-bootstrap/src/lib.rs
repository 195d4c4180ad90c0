//! Per-user remote display session bootstrap.
//!
//! Started as root with a username and a pre-created unix socket path, the
//! bootstrap hands the socket to the user, drops to that user for good,
//! starts a virtual X display for the user if none is running, and launches
//! the video server reading that display's framebuffer. Both children are
//! fully detached; nothing supervises them afterwards.
//!
//! ## Modules
//!
//! - [`identity`]: username to uid, gid, home and supplementary groups
//! - [`privilege`]: socket ownership handoff and the ordered identity drop
//! - [`session`]: fail-open probe for an existing display, scratch layout
//! - [`daemon`]: double-fork launcher
//! - [`command`]: argv templates and child environment
//! - [`bootstrap`]: the end-to-end sequence

pub mod bootstrap;
pub mod command;
pub mod config;
pub mod daemon;
pub mod diag;
pub mod error;
pub mod identity;
pub mod privilege;
pub mod session;

pub use bootstrap::{Bootstrap, BootstrapReport, DisplayDecision, Stage};
pub use config::BootstrapConfig;
pub use error::{BootstrapError, BootstrapResult, PrivilegeStep};
pub use identity::Identity;
