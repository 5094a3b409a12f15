//! A typed description of an external program invocation, the launcher that
//! wraps invocations in the container image or the MPI launcher, and the two
//! ways of running them: with output redirected into a log file, or with
//! output captured for a query.

use std::ffi::{OsStr, OsString};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use signal_hook::consts::{SIGINT, SIGTERM};

use crate::config::Config;
use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Script handed to `bash -c` inside the container. The environment file
/// arrives as `$0` and the command as `$@`, so no argument is ever re-quoted.
const CONTAINER_SCRIPT: &str = "source \"$0\" && exec \"$@\"";

/// A program, its arguments, and the directory to run it in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    program: OsString,
    args: Vec<OsString>,
    dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<OsString>) -> Self {
        Invocation {
            program: program.into(),
            args: Vec::new(),
            dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// The program followed by its arguments, for logs and run records.
    pub fn command_line(&self) -> Vec<String> {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.dir {
            command.current_dir(dir);
        }
        command
    }
}

/// Decides where an invocation actually runs: directly on the host, or via
/// `<runtime> exec <image> bash -c ...` when an image is configured and
/// present.
pub struct Launcher<'a> {
    config: &'a Config,
}

impl<'a> Launcher<'a> {
    pub fn new(config: &'a Config) -> Self {
        Launcher { config }
    }

    /// Wrap an invocation so that it runs inside the container, if there is
    /// one. The working directory is kept.
    pub fn wrap(&self, invocation: Invocation) -> Invocation {
        let image = match self.config.active_image() {
            Some(image) => image,
            None => return invocation,
        };
        let Invocation { program, args, dir } = invocation;

        let wrapped = Invocation::new(&self.config.container_runtime)
            .arg("exec")
            .arg(image)
            .args(["bash", "-c", CONTAINER_SCRIPT])
            .arg(&self.config.bashrc)
            .arg(program)
            .args(args);

        match dir {
            Some(dir) => wrapped.current_dir(dir),
            None => wrapped,
        }
    }

    /// Wrap an invocation in the MPI launcher with the given number of
    /// processes. The container wrapping, if any, happens inside the launcher
    /// so that every rank runs in the image.
    pub fn wrap_parallel(&self, invocation: Invocation, processes: usize) -> Invocation {
        let dir = invocation.dir.clone();
        let inner = self.wrap(invocation);

        let mut launch = Invocation::new(&self.config.mpirun)
            .arg("-np")
            .arg(processes.to_string());

        if self.config.bind_to_none {
            launch = launch.args(["--bind-to", "none"]);
        }
        launch = launch.arg(inner.program).args(inner.args);

        match dir {
            Some(dir) => launch.current_dir(dir),
            None => launch,
        }
    }
}

/// How a log file is opened for a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Redirect {
    Truncate,
    Append,
}

/// What became of a launched process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitState {
    Success,
    /// Non-zero exit, death by signal (`code` is then `None`), or failure to
    /// launch at all.
    Failed { code: Option<i32> },
    /// Stopped because this process received SIGINT or SIGTERM.
    Interrupted,
}

impl From<ExitStatus> for ExitState {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            ExitState::Success
        } else {
            ExitState::Failed {
                code: status.code(),
            }
        }
    }
}

/// Operator interrupts seen by this process. A detached `Interrupt` (the
/// default) never changes signal dispositions and is only set by
/// [`Interrupt::trigger`]. [`Interrupt::install`] ties it to SIGINT and
/// SIGTERM once per process: the first signal sets the flag so that a running
/// child can be stopped and recorded, a second one terminates as usual.
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn install() -> Result<Self> {
        let interrupt = Interrupt::default();

        for signal in [SIGINT, SIGTERM] {
            signal_hook::flag::register_conditional_default(signal, Arc::clone(&interrupt.flag))
                .map_err(Error::Signal)?;
            signal_hook::flag::register(signal, Arc::clone(&interrupt.flag)).map_err(Error::Signal)?;
        }
        Ok(interrupt)
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Relaxed)
    }
}

/// Run an invocation with stdout and stderr both going to `log`, and wait
/// for it. The exit status is reported, never treated as an error: only
/// failing to open or write the log is. A program that cannot be started
/// leaves its launch error in the log. Once `interrupt` is set the child is
/// killed and the run ends as `Interrupted`.
pub fn run_logged(
    invocation: &Invocation,
    log: &Path,
    redirect: Redirect,
    interrupt: &Interrupt,
) -> Result<ExitState> {
    let mut file = open_log(log, redirect)?;

    if interrupt.is_set() {
        writeln!(file, "not started: interrupted").map_err(|e| Error::io(log, e))?;
        return Ok(ExitState::Interrupted);
    }
    let stderr = file.try_clone().map_err(|e| Error::io(log, e))?;
    let stdout = file.try_clone().map_err(|e| Error::io(log, e))?;

    let mut command = invocation.to_command();
    command
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));

    debug!("Spawning {:?}", invocation.command_line());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!("Could not launch {}: {}", invocation.program.to_string_lossy(), e);
            writeln!(file, "could not launch {}: {}", invocation.program.to_string_lossy(), e)
                .map_err(|e| Error::io(log, e))?;
            return Ok(ExitState::Failed { code: None });
        }
    };

    loop {
        // The child usually shares our process group and sees the same
        // signal, so it may already be gone when the flag is noticed.
        let stop = interrupt.is_set();

        match child.try_wait() {
            Ok(Some(_)) if stop => return Ok(ExitState::Interrupted),
            Ok(Some(status)) => return Ok(ExitState::from(status)),
            Ok(None) => (),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::io(log, e));
            }
        }
        if stop {
            warn!("Interrupted, stopping {}", invocation.program.to_string_lossy());
            let _ = child.kill();
            let _ = child.wait();
            return Ok(ExitState::Interrupted);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// The result of a captured run.
#[derive(Debug)]
pub struct Captured {
    pub state: ExitState,
    pub stdout: String,
}

/// Run an invocation, capturing stdout and discarding stderr.
pub fn capture(invocation: &Invocation) -> Result<Captured> {
    let output = invocation
        .to_command()
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .map_err(|e| Error::io(invocation.program(), e))?;

    Ok(Captured {
        state: output.status.into(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
    })
}

fn open_log(log: &Path, redirect: Redirect) -> Result<File> {
    let mut options = OpenOptions::new();
    options.create(true);

    match redirect {
        Redirect::Truncate => options.write(true).truncate(true),
        Redirect::Append => options.append(true),
    };
    options.open(log).map_err(|e| Error::io(log, e))
}
