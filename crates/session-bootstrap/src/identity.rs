//! Target identity resolution.
//!
//! Maps a username to its uid, primary gid, home directory and the full
//! supplementary group list the process must carry after the privilege drop.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use crate::config::{IdentityConfig, IdentitySource};
use crate::diag::Diagnostics;
use crate::diag_debug;
use crate::error::{BootstrapError, BootstrapResult};

/// `getent` exit status for "key not found in database".
const GETENT_NOT_FOUND: i32 = 2;

/// A fully resolved target identity. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    pub home_dir: PathBuf,
    /// Groups listing the user as a member, then the primary gid. No duplicates.
    pub supplementary_gids: Vec<u32>,
}

impl Identity {
    /// X display name for this identity (`:<uid>`).
    pub fn display_name(&self) -> String {
        format!(":{}", self.uid)
    }
}

/// One passwd record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home_dir: PathBuf,
}

/// One group record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

/// Source of user and group records.
pub trait IdentityDatabase {
    /// Look up a user by name. `Ok(None)` means the user does not exist.
    fn user(&self, username: &str) -> BootstrapResult<Option<PasswdEntry>>;

    /// Every group in the database.
    fn groups(&self) -> BootstrapResult<Vec<GroupEntry>>;
}

/// Build the database selected in the config.
pub fn database_from_config(
    config: &IdentityConfig,
    diag: Arc<dyn Diagnostics>,
) -> Box<dyn IdentityDatabase> {
    match config.source {
        IdentitySource::Getent => Box::new(GetentDatabase::new(&config.getent_path, diag)),
        IdentitySource::Files => Box::new(FileDatabase::new(
            &config.passwd_path,
            &config.group_path,
            diag,
        )),
    }
}

/// Resolve `username` into a full [`Identity`].
pub fn resolve(db: &dyn IdentityDatabase, username: &str) -> BootstrapResult<Identity> {
    validate_username(username)?;

    let entry = db
        .user(username)?
        .filter(|entry| entry.name == username)
        .ok_or_else(|| BootstrapError::UserNotFound(username.to_string()))?;

    let mut supplementary_gids: Vec<u32> = Vec::new();
    let memberships = db
        .groups()?
        .into_iter()
        .filter(|group| group.members.iter().any(|member| member == username))
        .map(|group| group.gid);

    for gid in memberships.chain(std::iter::once(entry.gid)) {
        if !supplementary_gids.contains(&gid) {
            supplementary_gids.push(gid);
        }
    }

    Ok(Identity {
        username: entry.name,
        uid: entry.uid,
        gid: entry.gid,
        home_dir: entry.home_dir,
        supplementary_gids,
    })
}

/// Reject names that cannot appear in a passwd record.
pub fn validate_username(username: &str) -> BootstrapResult<()> {
    let bad_char = |c: char| c == ':' || c == '/' || c.is_whitespace() || c.is_control();
    if username.is_empty() || username.starts_with('-') || username.chars().any(bad_char) {
        return Err(BootstrapError::InvalidUsername(username.to_string()));
    }
    Ok(())
}

/// NSS-backed database using `getent`.
pub struct GetentDatabase {
    program: PathBuf,
    diag: Arc<dyn Diagnostics>,
}

impl GetentDatabase {
    pub fn new(program: impl AsRef<Path>, diag: Arc<dyn Diagnostics>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            diag,
        }
    }

    /// Run `getent <args>`; `Ok(None)` when the key is not found.
    fn query(&self, args: &[&str]) -> BootstrapResult<Option<String>> {
        let output = Command::new(&self.program).args(args).output().map_err(|e| {
            BootstrapError::IdentityLookup(format!(
                "running {} {:?}: {e}",
                self.program.display(),
                args
            ))
        })?;

        match output.status.code() {
            Some(0) => Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned())),
            Some(GETENT_NOT_FOUND) => Ok(None),
            _ => Err(BootstrapError::IdentityLookup(format!(
                "{} {:?} failed ({}): {}",
                self.program.display(),
                args,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}

impl IdentityDatabase for GetentDatabase {
    fn user(&self, username: &str) -> BootstrapResult<Option<PasswdEntry>> {
        let Some(out) = self.query(&["passwd", username])? else {
            return Ok(None);
        };
        let entry = passwd_record_named(&out, username)?;
        if entry.is_none() {
            diag_debug!(
                self.diag,
                "getent passwd {} matched a different account, ignoring",
                username
            );
        }
        Ok(entry)
    }

    fn groups(&self) -> BootstrapResult<Vec<GroupEntry>> {
        let out = self.query(&["group"])?.unwrap_or_default();
        Ok(parse_group_records(&out, self.diag.as_ref()))
    }
}

/// Database backed by passwd/group files.
pub struct FileDatabase {
    passwd_path: PathBuf,
    group_path: PathBuf,
    diag: Arc<dyn Diagnostics>,
}

impl FileDatabase {
    pub fn new(
        passwd_path: impl AsRef<Path>,
        group_path: impl AsRef<Path>,
        diag: Arc<dyn Diagnostics>,
    ) -> Self {
        Self {
            passwd_path: passwd_path.as_ref().to_path_buf(),
            group_path: group_path.as_ref().to_path_buf(),
            diag,
        }
    }

    fn read(path: &Path) -> BootstrapResult<String> {
        fs::read_to_string(path).map_err(|e| {
            BootstrapError::IdentityLookup(format!("reading {}: {e}", path.display()))
        })
    }
}

impl IdentityDatabase for FileDatabase {
    fn user(&self, username: &str) -> BootstrapResult<Option<PasswdEntry>> {
        let contents = Self::read(&self.passwd_path)?;
        for line in records(&contents) {
            // Only fully parse the matching record; unrelated garbage is ignored.
            if line.split(':').next() == Some(username) {
                return parse_passwd_line(line).map(Some);
            }
        }
        Ok(None)
    }

    fn groups(&self) -> BootstrapResult<Vec<GroupEntry>> {
        let contents = Self::read(&self.group_path)?;
        Ok(parse_group_records(&contents, self.diag.as_ref()))
    }
}

/// First passwd record in `getent` output, if it belongs to `username`.
///
/// `getent passwd <key>` also matches numeric uids, so `0` yields root's
/// record. Only an exact name match counts.
fn passwd_record_named(out: &str, username: &str) -> BootstrapResult<Option<PasswdEntry>> {
    let line = out
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| {
            BootstrapError::IdentityLookup(format!("empty passwd record for {username}"))
        })?;
    let entry = parse_passwd_line(line)?;
    Ok((entry.name == username).then_some(entry))
}

/// Non-empty, non-comment lines.
fn records(contents: &str) -> impl Iterator<Item = &str> {
    contents
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Parse `name:passwd:uid:gid:gecos:home:shell`.
pub fn parse_passwd_line(line: &str) -> BootstrapResult<PasswdEntry> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 7 {
        return Err(BootstrapError::IdentityLookup(format!(
            "malformed passwd record: {line:?}"
        )));
    }

    Ok(PasswdEntry {
        name: fields[0].to_string(),
        uid: parse_id(fields[2], "uid", line)?,
        gid: parse_id(fields[3], "gid", line)?,
        home_dir: PathBuf::from(fields[5]),
    })
}

/// Parse `name:passwd:gid:member,member,...`.
pub fn parse_group_line(line: &str) -> BootstrapResult<GroupEntry> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 4 {
        return Err(BootstrapError::IdentityLookup(format!(
            "malformed group record: {line:?}"
        )));
    }

    Ok(GroupEntry {
        name: fields[0].to_string(),
        gid: parse_id(fields[2], "gid", line)?,
        members: fields[3]
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect(),
    })
}

/// Parse every group record, skipping ones that do not parse (NIS `+`
/// compat lines and the like).
fn parse_group_records(contents: &str, diag: &dyn Diagnostics) -> Vec<GroupEntry> {
    records(contents)
        .filter_map(|line| match parse_group_line(line) {
            Ok(group) => Some(group),
            Err(e) => {
                diag_debug!(diag, "skipping group record: {}", e);
                None
            }
        })
        .collect()
}

fn parse_id(field: &str, what: &str, line: &str) -> BootstrapResult<u32> {
    field
        .parse::<u32>()
        .map_err(|_| BootstrapError::IdentityLookup(format!("bad {what} in record {line:?}")))
}
