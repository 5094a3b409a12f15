//! Runs toolkit applications in a case with their output in `log.<app>`,
//! skipping applications whose log file already exists. Each run also leaves
//! a `log.<app>.status` record saying how it ended, so that a failed run can
//! be told apart from a successful one.

use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::case::Case;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::process::{self, ExitState, Invocation, Launcher, Redirect};

/// What to do about an existing log file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogMode {
    /// Do not run again if the log exists.
    #[default]
    Skip,
    /// Run again and append to the log.
    Append,
    /// Run again and replace the log.
    Overwrite,
}

/// Options recognized in front of the application name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: LogMode,
    pub suffix: Option<String>,
    /// Explicit process count; only used by parallel runs.
    pub processes: Option<usize>,
    /// Alternative decomposition dictionary, forwarded to the application.
    pub decompose_par_dict: Option<PathBuf>,
    /// Run again, even in `Skip` mode, if the record says the last run did
    /// not succeed.
    pub rerun_failed: bool,
}

/// A parsed command line: options, then the application, then everything
/// that is passed through to the application untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunArgs {
    pub options: RunOptions,
    pub application: Option<String>,
    pub args: Vec<String>,
}

impl RunArgs {
    /// Parse `[-a|-append] [-o|-overwrite] [-s|-suffix name] [-n|-np count]
    /// [-decomposeParDict dict] [application [args...]]`. The long forms are
    /// also accepted with two dashes. Options are only recognized before the
    /// application name; a later mode flag overrides an earlier one.
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parsed = RunArgs::default();
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            let mut value = |name: &str| {
                args.next()
                    .ok_or_else(|| Error::Usage(format!("option '{}' requires a value", name)))
            };
            match arg.as_str() {
                "-a" | "-append" | "--append" => parsed.options.mode = LogMode::Append,
                "-o" | "-overwrite" | "--overwrite" => parsed.options.mode = LogMode::Overwrite,
                "-s" | "-suffix" | "--suffix" => parsed.options.suffix = Some(value(arg.as_str())?),
                "-n" | "-np" | "--np" => {
                    let count = value(arg.as_str())?;
                    parsed.options.processes = match count.parse::<usize>() {
                        Ok(n) if n > 0 => Some(n),
                        _ => return Err(Error::Usage(format!("invalid process count '{}'", count))),
                    };
                }
                "-decomposeParDict" | "--decomposeParDict" => {
                    parsed.options.decompose_par_dict = Some(PathBuf::from(value(arg.as_str())?))
                }
                "-rerun-failed" | "--rerun-failed" => parsed.options.rerun_failed = true,
                "" => (),
                _ => {
                    parsed.application = Some(arg);
                    parsed.args = args.by_ref().collect();
                    break;
                }
            }
        }
        Ok(parsed)
    }
}

/// Name of the log file for an application: `log.<base name>[.<suffix>]`.
pub fn log_name(application: &str, suffix: Option<&str>) -> String {
    let base = Path::new(application)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| application.to_string());

    match suffix {
        Some(suffix) => format!("log.{}.{}", base, suffix),
        None => format!("log.{}", base),
    }
}

/// Path of the record kept next to a log file.
pub fn record_path(log: &Path) -> PathBuf {
    let mut name = log.as_os_str().to_os_string();
    name.push(".status");
    PathBuf::from(name)
}

/// How the most recent run behind a log file ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Started but never recorded an end: still running, or the
    /// orchestrating process died.
    InProgress,
    Succeeded,
    Failed { code: Option<i32> },
    Interrupted,
}

impl RunStatus {
    pub fn succeeded(&self) -> bool {
        matches!(self, RunStatus::Succeeded)
    }
}

impl From<ExitState> for RunStatus {
    fn from(state: ExitState) -> Self {
        match state {
            ExitState::Success => RunStatus::Succeeded,
            ExitState::Failed { code } => RunStatus::Failed { code },
            ExitState::Interrupted => RunStatus::Interrupted,
        }
    }
}

/// Contents of a `.status` file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub application: String,
    pub command: Vec<String>,
    pub status: RunStatus,
    pub started: u64,
    pub finished: Option<u64>,
}

impl RunRecord {
    /// Load the record for a log file, if there is one.
    pub fn load(log: &Path) -> Result<Option<RunRecord>> {
        let path = record_path(log);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(&path, e)),
        };
        ciborium::de::from_reader(BufReader::new(file))
            .map(Some)
            .map_err(|e| Error::Record(format!("{}: {:?}", path.display(), e)))
    }

    pub fn save(&self, log: &Path) -> Result<()> {
        let path = record_path(log);
        let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
        let mut writer = BufWriter::new(file);

        ciborium::ser::into_writer(self, &mut writer)
            .map_err(|e| Error::Record(format!("{}: {:?}", path.display(), e)))?;
        writer.flush().map_err(|e| Error::io(&path, e))
    }
}

/// What a call to the runner did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The log file already existed; nothing was run.
    AlreadyRun {
        log: PathBuf,
        previous: Option<RunStatus>,
    },
    /// The application was run (whether or not it succeeded).
    Completed { log: PathBuf, status: RunStatus },
}

impl RunOutcome {
    pub fn log(&self) -> &Path {
        match self {
            RunOutcome::AlreadyRun { log, .. } => log,
            RunOutcome::Completed { log, .. } => log,
        }
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Runs applications in one case under one configuration.
pub struct Runner<'a> {
    pub(crate) config: &'a Config,
    pub(crate) case: &'a Case,
}

impl<'a> Runner<'a> {
    pub fn new(config: &'a Config, case: &'a Case) -> Self {
        Runner { config, case }
    }

    /// Run `application` with `args` in the case directory, unless its log
    /// file already exists and `options.mode` is `Skip`. The application's
    /// exit status is recorded, not returned as an error.
    pub fn run_application<S>(&self, options: &RunOptions, application: &str, args: &[S]) -> Result<RunOutcome>
    where
        S: AsRef<OsStr>,
    {
        self.dispatch(options, application, || {
            info!("Running {} on {}", application, self.case.root().display());
            let invocation = self.invocation(options, application, args);
            Launcher::new(self.config).wrap(invocation)
        })
    }

    /// The application with its forwarded options and arguments, to be run
    /// from the case root.
    pub(crate) fn invocation<S>(&self, options: &RunOptions, application: &str, args: &[S]) -> Invocation
    where
        S: AsRef<OsStr>,
    {
        let mut invocation = Invocation::new(application).current_dir(self.case.root());

        if let Some(dict) = &options.decompose_par_dict {
            invocation = invocation.arg("-decomposeParDict").arg(dict);
        }
        invocation.args(args.iter().map(|a| a.as_ref().to_os_string()))
    }

    /// Shared by serial and parallel runs: the log-file check, the run
    /// itself, and the record keeping. `launch` is only called once it is
    /// settled that the application runs.
    pub(crate) fn dispatch<F>(&self, options: &RunOptions, application: &str, launch: F) -> Result<RunOutcome>
    where
        F: FnOnce() -> Invocation,
    {
        let log = self.case.path(log_name(application, options.suffix.as_deref()));
        let mut redirect = match options.mode {
            LogMode::Append => Redirect::Append,
            LogMode::Skip | LogMode::Overwrite => Redirect::Truncate,
        };

        if options.mode == LogMode::Skip && log.exists() {
            let previous = match RunRecord::load(&log) {
                Ok(record) => record.map(|r| r.status),
                Err(e) => {
                    warn!("Ignoring unreadable run record: {}", e);
                    None
                }
            };
            let failed = previous.map_or(false, |status| !status.succeeded());

            if failed && options.rerun_failed {
                warn!(
                    "Previous run of {} ended as {:?}, running again",
                    application,
                    previous.unwrap_or(RunStatus::InProgress)
                );
                redirect = Redirect::Truncate;
            } else {
                if failed {
                    warn!(
                        "Previous run of {} ended as {:?}: pass -overwrite or --rerun-failed to run again",
                        application,
                        previous.unwrap_or(RunStatus::InProgress)
                    );
                }
                info!(
                    "{} already run on {}: remove log file '{}' to re-run",
                    application,
                    self.case.root().display(),
                    log.display()
                );
                return Ok(RunOutcome::AlreadyRun { log, previous });
            }
        }

        let invocation = launch();

        let mut record = RunRecord {
            application: application.to_string(),
            command: invocation.command_line(),
            status: RunStatus::InProgress,
            started: now(),
            finished: None,
        };
        record.save(&log)?;

        let state = process::run_logged(&invocation, &log, redirect, &self.config.interrupt)?;

        record.status = state.into();
        record.finished = Some(now());
        record.save(&log)?;

        if !record.status.succeeded() {
            warn!("{} ended as {:?}, see {}", application, record.status, log.display());
        }
        Ok(RunOutcome::Completed {
            log,
            status: record.status,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    fn parse(args: &[&str]) -> RunArgs {
        RunArgs::parse(args.iter().copied()).unwrap()
    }

    #[test]
    fn options_stop_at_the_application() {
        let parsed = parse(&["-s", "coarse", "-o", "blockMesh", "-dict", "system/blockMeshDict.coarse"]);
        assert_eq!(parsed.options.suffix.as_deref(), Some("coarse"));
        assert_eq!(parsed.options.mode, LogMode::Overwrite);
        assert_eq!(parsed.application.as_deref(), Some("blockMesh"));
        assert_eq!(parsed.args, ["-dict", "system/blockMeshDict.coarse"]);
    }

    #[test]
    fn later_mode_flags_win() {
        assert_eq!(parse(&["-o", "-append", "x"]).options.mode, LogMode::Append);
        assert_eq!(parse(&["--append", "-overwrite", "x"]).options.mode, LogMode::Overwrite);
    }

    #[test]
    fn parallel_options_are_parsed() {
        let parsed = parse(&["-np", "8", "-decomposeParDict", "system/decomposeParDict.8", "simpleFoam"]);
        assert_eq!(parsed.options.processes, Some(8));
        assert_eq!(
            parsed.options.decompose_par_dict,
            Some(PathBuf::from("system/decomposeParDict.8"))
        );
        assert!(parsed.args.is_empty());
    }

    #[test]
    fn missing_application_is_allowed() {
        let parsed = parse(&["-a"]);
        assert_eq!(parsed.application, None);
        assert_eq!(parsed.options.mode, LogMode::Append);
    }

    #[test]
    fn bad_options_are_usage_errors() {
        assert!(matches!(RunArgs::parse(["-s"]), Err(Error::Usage(_))));
        assert!(matches!(RunArgs::parse(["-np", "zero", "x"]), Err(Error::Usage(_))));
        assert!(matches!(RunArgs::parse(["-n", "0", "x"]), Err(Error::Usage(_))));
    }

    #[test]
    fn log_names_use_base_name_and_suffix() {
        assert_eq!(log_name("simpleFoam", None), "log.simpleFoam");
        assert_eq!(log_name("./bin/setFields", Some("init")), "log.setFields.init");
        assert_eq!(record_path(Path::new("case/log.icoFoam")), PathBuf::from("case/log.icoFoam.status"));
    }

    #[cfg(unix)]
    #[test]
    fn existing_log_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let case = Case::new(dir.path());
        let config = Config::default();
        let runner = Runner::new(&config, &case);
        fs::write(case.path("log.echo"), "from an earlier run\n").unwrap();

        let outcome = runner.run_application(&RunOptions::default(), "echo", &["again"]).unwrap();
        assert_eq!(
            outcome,
            RunOutcome::AlreadyRun {
                log: case.path("log.echo"),
                previous: None
            }
        );
        assert_eq!(fs::read_to_string(case.path("log.echo")).unwrap(), "from an earlier run\n");
    }

    #[cfg(unix)]
    #[test]
    fn modes_control_the_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let case = Case::new(dir.path());
        let config = Config::default();
        let runner = Runner::new(&config, &case);
        let log = case.path("log.echo");

        runner.run_application(&RunOptions::default(), "echo", &["first"]).unwrap();
        assert_eq!(fs::read_to_string(&log).unwrap(), "first\n");

        let append = RunOptions {
            mode: LogMode::Append,
            ..RunOptions::default()
        };
        runner.run_application(&append, "echo", &["second"]).unwrap();
        assert_eq!(fs::read_to_string(&log).unwrap(), "first\nsecond\n");

        let overwrite = RunOptions {
            mode: LogMode::Overwrite,
            ..RunOptions::default()
        };
        runner.run_application(&overwrite, "echo", &["third"]).unwrap();
        assert_eq!(fs::read_to_string(&log).unwrap(), "third\n");

        let suffixed = RunOptions {
            suffix: Some("b".into()),
            ..RunOptions::default()
        };
        runner.run_application(&suffixed, "echo", &["fourth"]).unwrap();
        assert_eq!(fs::read_to_string(case.path("log.echo.b")).unwrap(), "fourth\n");
    }

    #[cfg(unix)]
    #[test]
    fn runs_happen_in_the_case_directory() {
        let dir = tempfile::tempdir().unwrap();
        let case = Case::new(dir.path());
        let config = Config::default();
        fs::write(case.path("marker"), "").unwrap();

        Runner::new(&config, &case)
            .run_application(&RunOptions::default(), "ls", &[] as &[&str])
            .unwrap();
        assert!(fs::read_to_string(case.path("log.ls")).unwrap().contains("marker"));
    }

    #[cfg(unix)]
    #[test]
    fn failed_runs_are_recorded_and_still_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let case = Case::new(dir.path());
        let config = Config::default();
        let runner = Runner::new(&config, &case);

        let outcome = runner.run_application(&RunOptions::default(), "sh", &["-c", "exit 2"]).unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Completed {
                log: case.path("log.sh"),
                status: RunStatus::Failed { code: Some(2) }
            }
        );
        let record = RunRecord::load(&case.path("log.sh")).unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Failed { code: Some(2) });
        assert_eq!(record.command, ["sh", "-c", "exit 2"]);
        assert!(record.finished.is_some());

        let outcome = runner.run_application(&RunOptions::default(), "sh", &["-c", "exit 0"]).unwrap();
        assert_eq!(
            outcome,
            RunOutcome::AlreadyRun {
                log: case.path("log.sh"),
                previous: Some(RunStatus::Failed { code: Some(2) })
            }
        );

        let rerun = RunOptions {
            rerun_failed: true,
            ..RunOptions::default()
        };
        let outcome = runner.run_application(&rerun, "sh", &["-c", "exit 0"]).unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Completed {
                log: case.path("log.sh"),
                status: RunStatus::Succeeded
            }
        );

        let outcome = runner.run_application(&rerun, "sh", &["-c", "exit 0"]).unwrap();
        assert!(matches!(outcome, RunOutcome::AlreadyRun { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn decompose_dict_is_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let case = Case::new(dir.path());
        let config = Config::default();
        let options = RunOptions {
            decompose_par_dict: Some("system/decomposeParDict.2".into()),
            ..RunOptions::default()
        };
        Runner::new(&config, &case)
            .run_application(&options, "echo", &["tail"])
            .unwrap();
        assert_eq!(
            fs::read_to_string(case.path("log.echo")).unwrap(),
            "-decomposeParDict system/decomposeParDict.2 tail\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn interrupted_runs_are_recorded_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let case = Case::new(dir.path());
        let config = Config::default();
        let runner = Runner::new(&config, &case);

        let interrupt = config.interrupt.clone();
        let operator = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(300));
            interrupt.trigger();
        });
        let outcome = runner.run_application(&RunOptions::default(), "sleep", &["5"]).unwrap();
        operator.join().unwrap();

        assert_eq!(
            outcome,
            RunOutcome::Completed {
                log: case.path("log.sleep"),
                status: RunStatus::Interrupted
            }
        );
        let record = RunRecord::load(&case.path("log.sleep")).unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Interrupted);
        assert!(record.finished.is_some());

        let outcome = runner.run_application(&RunOptions::default(), "sleep", &["0"]).unwrap();
        assert_eq!(
            outcome,
            RunOutcome::AlreadyRun {
                log: case.path("log.sleep"),
                previous: Some(RunStatus::Interrupted)
            }
        );
    }
}
