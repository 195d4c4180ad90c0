//! Fire-and-forget launching of long-lived children.
//!
//! [`DoubleForkLauncher`] forks an intermediate process, which starts a new
//! session, forks the real child and exits at once. The caller only waits for
//! the intermediate, so the wait is bounded by process creation rather than
//! by the child's lifetime, and no zombie is left behind. The grandchild is
//! re-parented to init (or the nearest subreaper), which reaps it; its exit
//! status is never seen here.
//!
//! Everything the forked processes need is converted to C strings up front,
//! so between `fork` and `execve` only async-signal-safe calls are made.

use std::collections::BTreeMap;
use std::ffi::CString;
use std::io;
use std::ptr;
use std::sync::Arc;

use fork::Fork;

use crate::diag::Diagnostics;
use crate::error::{BootstrapError, BootstrapResult};
use crate::{diag_debug, diag_warn};

/// Exit status of the grandchild when `execve` fails.
const EXEC_FAILED: libc::c_int = 127;

/// Exit status of the intermediate when it cannot fork the grandchild.
const SECOND_FORK_FAILED: libc::c_int = 1;

/// A program to run: argument vector plus its complete environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSpec {
    /// `argv[0]` is the absolute path of the executable.
    pub argv: Vec<String>,
    /// The child sees exactly these variables and nothing else.
    pub env: BTreeMap<String, String>,
}

impl ChildSpec {
    pub fn new(argv: Vec<String>, env: BTreeMap<String, String>) -> Self {
        Self { argv, env }
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }
}

/// Starts a process that outlives the caller and is never waited on.
pub trait Launcher {
    /// Returns once the child has been handed off. A child that fails to
    /// exec is not reported.
    fn detach(&self, spec: &ChildSpec) -> BootstrapResult<()>;
}

/// C-level form of a [`ChildSpec`], built before forking.
struct ExecImage {
    path: CString,
    _argv: Vec<CString>,
    _envp: Vec<CString>,
    argv_ptrs: Vec<*const libc::c_char>,
    envp_ptrs: Vec<*const libc::c_char>,
}

impl ExecImage {
    fn new(spec: &ChildSpec) -> BootstrapResult<Self> {
        if spec.argv.is_empty() {
            return Err(BootstrapError::InvalidCommand(
                "empty argument vector".to_string(),
            ));
        }

        let to_c = |s: String| {
            CString::new(s).map_err(|e| {
                BootstrapError::InvalidCommand(format!(
                    "{}: interior NUL byte at {}",
                    spec.program(),
                    e.nul_position()
                ))
            })
        };

        let argv = spec
            .argv
            .iter()
            .cloned()
            .map(to_c)
            .collect::<BootstrapResult<Vec<_>>>()?;

        let mut envp = Vec::with_capacity(spec.env.len());
        for (key, value) in &spec.env {
            if key.is_empty() || key.contains('=') {
                return Err(BootstrapError::InvalidCommand(format!(
                    "invalid environment variable name {key:?}"
                )));
            }
            envp.push(to_c(format!("{key}={value}"))?);
        }

        let path = argv[0].clone();
        let argv_ptrs = argv
            .iter()
            .map(|s| s.as_ptr())
            .chain(std::iter::once(ptr::null()))
            .collect();
        let envp_ptrs = envp
            .iter()
            .map(|s| s.as_ptr())
            .chain(std::iter::once(ptr::null()))
            .collect();

        Ok(Self {
            path,
            _argv: argv,
            _envp: envp,
            argv_ptrs,
            envp_ptrs,
        })
    }

    /// Replace the current process image. Only returns by exiting.
    ///
    /// # Safety
    ///
    /// Must only be called in a freshly forked child.
    unsafe fn exec(&self) -> ! {
        // SAFETY: all pointers refer to NUL-terminated strings owned by self,
        // and both arrays end in a null pointer.
        unsafe {
            libc::execve(
                self.path.as_ptr(),
                self.argv_ptrs.as_ptr(),
                self.envp_ptrs.as_ptr(),
            );
            libc::_exit(EXEC_FAILED)
        }
    }
}

/// The double-fork launcher.
pub struct DoubleForkLauncher {
    diag: Arc<dyn Diagnostics>,
}

impl DoubleForkLauncher {
    pub fn new(diag: Arc<dyn Diagnostics>) -> Self {
        Self { diag }
    }

    /// Wait for the intermediate process and return its exit status.
    fn reap(pid: libc::pid_t) -> io::Result<libc::c_int> {
        let mut status: libc::c_int = 0;
        loop {
            // SAFETY: status is a valid out-pointer for the duration of the call.
            let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
            if ret == pid {
                return Ok(status);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

impl Launcher for DoubleForkLauncher {
    fn detach(&self, spec: &ChildSpec) -> BootstrapResult<()> {
        let image = ExecImage::new(spec)?;
        let program = spec.program().to_string();
        diag_debug!(self.diag, "detaching {:?}", spec.argv);

        match fork::fork() {
            Ok(Fork::Parent(pid)) => {
                let status = Self::reap(pid).map_err(|source| BootstrapError::Launch {
                    program: program.clone(),
                    source,
                })?;
                if !libc::WIFEXITED(status) || libc::WEXITSTATUS(status) != 0 {
                    diag_warn!(
                        self.diag,
                        "intermediate for {} ended abnormally (wait status {:#x}); {} may not be running",
                        program,
                        status,
                        program
                    );
                } else {
                    diag_debug!(self.diag, "{} handed off", program);
                }
                Ok(())
            }
            Ok(Fork::Child) => {
                // Intermediate process. Only async-signal-safe calls from here on.
                // SAFETY: setsid/_exit take no pointers; exec runs in the new child.
                unsafe {
                    libc::setsid();
                    match libc::fork() {
                        0 => image.exec(),
                        -1 => libc::_exit(SECOND_FORK_FAILED),
                        _ => libc::_exit(0),
                    }
                }
            }
            Err(_) => Err(BootstrapError::Launch {
                program,
                source: io::Error::last_os_error(),
            }),
        }
    }
}
