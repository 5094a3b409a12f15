//! Parallel runs: how many subdomains a case is decomposed into, which
//! application it is set up for, and launching an application under the MPI
//! launcher with the right process count.

use std::ffi::OsStr;
use std::path::Path;

use log::{error, info, warn};

use crate::case::{Case, CONTROL_DICT, DECOMPOSE_PAR_DICT};
use crate::config::Config;
use crate::dictionary;
use crate::error::{Error, Result};
use crate::process::Launcher;
use crate::runner::{RunOptions, RunOutcome, Runner};

/// Process count used when `numberOfSubdomains` cannot be determined.
pub const FALLBACK_SUBDOMAINS: usize = 1;

/// Application name reported when `application` cannot be determined. Like
/// the `false` command, running it does nothing and fails.
pub const NO_APPLICATION: &str = "false";

/// Look up `numberOfSubdomains` in a decomposition dictionary (by default
/// `system/decomposeParDict`). The dictionary name is resolved relative to
/// the case, falling back to `system/`. On failure the error is reported and
/// returned; callers that carry on should use [`FALLBACK_SUBDOMAINS`].
pub fn number_of_processors(config: &Config, case: &Case, dict: Option<&Path>) -> Result<usize> {
    let dict = case.resolve_dict(dict.unwrap_or_else(|| Path::new(DECOMPOSE_PAR_DICT)));
    let query = dictionary::query(config, case.root());

    let result = query
        .single_value(&dict, "numberOfSubdomains")
        .and_then(|value| match value.parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(Error::lookup(
                "numberOfSubdomains",
                &dict,
                format!("'{}' is not a positive integer", value),
            )),
        });

    if let Err(e) = &result {
        error!("{}", e);
    }
    result
}

/// Look up the `application` entry of `system/controlDict`. On failure the
/// error is reported and returned; the sentinel is [`NO_APPLICATION`].
pub fn application(config: &Config, case: &Case) -> Result<String> {
    let dict = case.path(CONTROL_DICT);
    let result = dictionary::query(config, case.root()).single_value(&dict, "application");

    if let Err(e) = &result {
        error!("{}", e);
    }
    result
}

fn host_cores() -> Option<usize> {
    core_affinity::get_core_ids().map(|ids| ids.len())
}

impl<'a> Runner<'a> {
    /// Run `application` on several processes with `-parallel`. The process
    /// count is, in order of preference: `options.processes`, the
    /// `numberOfSubdomains` of `options.decompose_par_dict`, or that of the
    /// case's default decomposition dictionary. If the lookup fails the run
    /// goes ahead on [`FALLBACK_SUBDOMAINS`] processes. Log handling is the
    /// same as for [`Runner::run_application`], and a skipped run does no
    /// lookup at all.
    pub fn run_parallel<S>(&self, options: &RunOptions, application: &str, args: &[S]) -> Result<RunOutcome>
    where
        S: AsRef<OsStr>,
    {
        self.dispatch(options, application, || {
            let processes = self.processes(options);
            info!(
                "Running {} ({} processes) on {}",
                application,
                processes,
                self.case.root().display()
            );
            let invocation = self.invocation(options, application, args).arg("-parallel");
            Launcher::new(self.config).wrap_parallel(invocation, processes)
        })
    }

    fn processes(&self, options: &RunOptions) -> usize {
        let processes = match options.processes {
            Some(n) => n,
            None => number_of_processors(
                self.config,
                self.case,
                options.decompose_par_dict.as_deref(),
            )
            .unwrap_or(FALLBACK_SUBDOMAINS),
        };

        if let Some(cores) = host_cores() {
            if processes > cores {
                warn!("Starting {} processes on a host with {} cores", processes, cores);
            }
        }
        processes
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::DictionaryBackend;
    use std::fs;

    fn native() -> Config {
        Config {
            dictionary_backend: DictionaryBackend::Native,
            ..Config::default()
        }
    }

    fn case_with(files: &[(&str, &str)]) -> (tempfile::TempDir, Case) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("system")).unwrap();
        for (name, contents) in files {
            fs::write(dir.path().join(name), contents).unwrap();
        }
        let case = Case::new(dir.path());
        (dir, case)
    }

    #[test]
    fn subdomains_come_from_the_decomposition_dict() {
        let (_dir, case) = case_with(&[
            ("system/decomposeParDict", "numberOfSubdomains 4;\nmethod scotch;\n"),
            ("system/decomposeParDict.8", "numberOfSubdomains 8;\n"),
        ]);
        assert_eq!(number_of_processors(&native(), &case, None).unwrap(), 4);
        assert_eq!(
            number_of_processors(&native(), &case, Some(Path::new("decomposeParDict.8"))).unwrap(),
            8
        );
    }

    #[test]
    fn missing_or_malformed_dicts_fail() {
        let (_dir, case) = case_with(&[
            ("system/decomposeParDict", "numberOfSubdomains four;\n"),
            ("system/decomposeParDict.2", "numberOfSubdomains 2 3;\n"),
            ("system/decomposeParDict.0", "numberOfSubdomains 0;\n"),
        ]);
        for dict in [None, Some("decomposeParDict.2"), Some("decomposeParDict.0"), Some("nothere")] {
            let result = number_of_processors(&native(), &case, dict.map(Path::new));
            assert!(matches!(result, Err(Error::Lookup { .. })), "{:?}", dict);
        }
    }

    #[test]
    fn application_comes_from_the_control_dict() {
        let (_dir, case) = case_with(&[("system/controlDict", "application simpleFoam;\nendTime 100;\n")]);
        assert_eq!(application(&native(), &case).unwrap(), "simpleFoam");

        let (_dir, case) = case_with(&[]);
        assert!(application(&native(), &case).is_err());
    }

    #[cfg(unix)]
    fn fake_mpirun(dir: &Path) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("mpirun");
        fs::write(&path, "#!/bin/sh\nprintf '%s\\n' \"$*\"\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn parallel_run_uses_subdomain_count() {
        let bin = tempfile::tempdir().unwrap();
        let (_dir, case) = case_with(&[("system/decomposeParDict", "numberOfSubdomains 4;\n")]);
        let config = Config {
            mpirun: fake_mpirun(bin.path()).into(),
            ..native()
        };

        let outcome = Runner::new(&config, &case)
            .run_parallel(&RunOptions::default(), "simpleFoam", &["-noFunctionObjects"])
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Completed { .. }));
        assert_eq!(
            fs::read_to_string(case.path("log.simpleFoam")).unwrap(),
            "-np 4 simpleFoam -noFunctionObjects -parallel\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn explicit_count_and_binding_flag() {
        let bin = tempfile::tempdir().unwrap();
        let (_dir, case) = case_with(&[]);
        let config = Config {
            mpirun: fake_mpirun(bin.path()).into(),
            bind_to_none: true,
            ..native()
        };
        let options = RunOptions {
            processes: Some(3),
            suffix: Some("np3".into()),
            ..RunOptions::default()
        };

        Runner::new(&config, &case)
            .run_parallel(&options, "pimpleFoam", &[] as &[&str])
            .unwrap();
        assert_eq!(
            fs::read_to_string(case.path("log.pimpleFoam.np3")).unwrap(),
            "-np 3 --bind-to none pimpleFoam -parallel\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn decomposition_dict_sets_count_and_is_forwarded() {
        let bin = tempfile::tempdir().unwrap();
        let (_dir, case) = case_with(&[("system/decomposeParDict.6", "numberOfSubdomains 6;\n")]);
        let config = Config {
            mpirun: fake_mpirun(bin.path()).into(),
            ..native()
        };
        let options = RunOptions {
            decompose_par_dict: Some("system/decomposeParDict.6".into()),
            ..RunOptions::default()
        };

        Runner::new(&config, &case)
            .run_parallel(&options, "icoFoam", &[] as &[&str])
            .unwrap();
        assert_eq!(
            fs::read_to_string(case.path("log.icoFoam")).unwrap(),
            "-np 6 icoFoam -decomposeParDict system/decomposeParDict.6 -parallel\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn failed_lookup_falls_back_to_one_process() {
        let bin = tempfile::tempdir().unwrap();
        let (_dir, case) = case_with(&[]);
        let config = Config {
            mpirun: fake_mpirun(bin.path()).into(),
            ..native()
        };

        Runner::new(&config, &case)
            .run_parallel(&RunOptions::default(), "icoFoam", &[] as &[&str])
            .unwrap();
        assert_eq!(
            fs::read_to_string(case.path("log.icoFoam")).unwrap(),
            "-np 1 icoFoam -parallel\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn existing_parallel_log_is_skipped() {
        let (_dir, case) = case_with(&[]);
        fs::write(case.path("log.icoFoam"), "done\n").unwrap();
        let config = Config {
            mpirun: "/nonexistent/mpirun".into(),
            ..native()
        };

        let outcome = Runner::new(&config, &case)
            .run_parallel(&RunOptions::default(), "icoFoam", &[] as &[&str])
            .unwrap();
        assert!(matches!(outcome, RunOutcome::AlreadyRun { .. }));
        assert_eq!(fs::read_to_string(case.path("log.icoFoam")).unwrap(), "done\n");
    }

    #[cfg(unix)]
    #[test]
    fn skipped_parallel_run_does_not_query_the_toolkit() {
        use std::os::unix::fs::PermissionsExt;

        let bin = tempfile::tempdir().unwrap();
        let queried = bin.path().join("queried");
        let tool = bin.path().join("foamDictionary");
        fs::write(&tool, format!("#!/bin/sh\ntouch {}\nexit 1\n", queried.display())).unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        let (_dir, case) = case_with(&[("log.simpleFoam", "done\n")]);
        let config = Config {
            dictionary_tool: tool.into(),
            dictionary_backend: DictionaryBackend::Toolkit,
            mpirun: "/nonexistent/mpirun".into(),
            ..Config::default()
        };

        let outcome = Runner::new(&config, &case)
            .run_parallel(&RunOptions::default(), "simpleFoam", &[] as &[&str])
            .unwrap();
        assert!(matches!(outcome, RunOutcome::AlreadyRun { .. }));
        assert!(!queried.exists());
    }
}
