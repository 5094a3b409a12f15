use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context};
use caseflow::case::Case;
use caseflow::clean::{self, Cleaned};
use caseflow::clone;
use caseflow::config::{Config, DictionaryBackend};
use caseflow::parallel::{self, FALLBACK_SUBDOMAINS, NO_APPLICATION};
use caseflow::process::Interrupt;
use caseflow::runner::{RunArgs, RunOutcome, RunStatus, Runner};
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, LevelFilter};
use simple_logger::SimpleLogger;

#[derive(Debug, Parser)]
#[command(name = "caseflow", version)]
#[command(about = "Run, clone, and clean CFD simulation cases")]
struct Opts {
    /// Case directory to operate on
    #[arg(short = 'C', long = "case", global = true, default_value = ".")]
    case: PathBuf,

    /// Container image to run applications in (overrides ML_CFD_IMAGE)
    #[arg(long, global = true)]
    image: Option<PathBuf>,

    /// Container runtime used to execute the image
    #[arg(long, global = true)]
    runtime: Option<String>,

    /// MPI launcher for parallel runs
    #[arg(long, global = true)]
    mpirun: Option<String>,

    /// Dictionary query utility
    #[arg(long, global = true)]
    dictionary_tool: Option<String>,

    /// Read dictionaries directly instead of asking the toolkit
    #[arg(long, global = true)]
    native_dict: bool,

    #[arg(short = 'l', long, global = true, default_value = "info")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run an application, logging to log.<app>
    Run {
        /// [-a|-o|-s suffix|-decomposeParDict dict] [application [args...]]
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run an application in parallel under the MPI launcher
    Parallel {
        /// [-a|-o|-s suffix|-np n|-decomposeParDict dict] [application [args...]]
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Print the number of subdomains of the case
    Nprocs {
        /// Decomposition dictionary (default system/decomposeParDict)
        dict: Option<PathBuf>,
    },
    /// Print the application named in system/controlDict
    Application,
    /// Clone a serial case
    Clone { src: PathBuf, dst: PathBuf },
    /// Clone a decomposed case, optionally only some of its times
    CloneParallel {
        src: PathBuf,
        dst: PathBuf,
        times: Vec<String>,
    },
    /// Remove run output from the case
    Clean {
        #[arg(value_enum, default_value = "case")]
        target: CleanTarget,
    },
    /// Restore 0/ from 0.orig/
    #[command(name = "restore0")]
    Restore0 {
        /// Restore processor*/0 instead
        #[arg(long)]
        processor: bool,
    },
    /// Delete a whole case directory
    Remove { dir: PathBuf },
    /// Print the active container image
    Image,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CleanTarget {
    Case,
    Case0,
    Times,
    Auxiliary,
    DynamicCode,
    Adios,
    Optimisation,
    PostProcessing,
    FaMesh,
    PolyMesh,
    Snappy,
    Samples,
}

impl Opts {
    fn config(&self) -> anyhow::Result<Config> {
        let mut config = Config::from_env();

        if let Some(image) = &self.image {
            config.set_image(image)?;
        }
        if let Some(runtime) = &self.runtime {
            config.container_runtime = runtime.into();
        }
        if let Some(mpirun) = &self.mpirun {
            config.mpirun = mpirun.into();
        }
        if let Some(tool) = &self.dictionary_tool {
            config.dictionary_tool = tool.into();
        }
        if self.native_dict {
            config.dictionary_backend = DictionaryBackend::Native;
        }
        Ok(config)
    }
}

fn run_args(config: &Config, case: &Case, args: &[String]) -> anyhow::Result<(RunArgs, String)> {
    let parsed = RunArgs::parse(args.iter().cloned())?;
    let application = match &parsed.application {
        Some(application) => application.clone(),
        None => parallel::application(config, case)
            .context("no application given and none found in system/controlDict")?,
    };
    Ok((parsed, application))
}

/// Exit status conventionally used after SIGINT.
const INTERRUPTED: u8 = 130;

/// The application's own exit status is not passed on, but a run the operator
/// interrupted stops the calling script.
fn report(outcome: RunOutcome) -> ExitCode {
    match outcome {
        RunOutcome::Completed {
            status: RunStatus::Interrupted,
            log,
        } => {
            error!("Interrupted, see {}", log.display());
            ExitCode::from(INTERRUPTED)
        }
        RunOutcome::Completed { log, status } => {
            log::debug!("{} -> {:?}", log.display(), status);
            ExitCode::SUCCESS
        }
        RunOutcome::AlreadyRun { .. } => ExitCode::SUCCESS,
    }
}

fn clean_target(target: CleanTarget, case: &Case) -> caseflow::Result<Cleaned> {
    match target {
        CleanTarget::Case => clean::clean_case(case),
        CleanTarget::Case0 => clean::clean_case0(case),
        CleanTarget::Times => clean::clean_time_directories(case),
        CleanTarget::Auxiliary => clean::clean_auxiliary(case),
        CleanTarget::DynamicCode => clean::clean_dynamic_code(case),
        CleanTarget::Adios => clean::clean_adios_output(case),
        CleanTarget::Optimisation => clean::clean_optimisation(case),
        CleanTarget::PostProcessing => clean::clean_post_processing(case),
        CleanTarget::FaMesh => clean::clean_fa_mesh(case),
        CleanTarget::PolyMesh => clean::clean_poly_mesh(case),
        CleanTarget::Snappy => clean::clean_snappy_files(case),
        CleanTarget::Samples => clean::clean_samples(case),
    }
}

fn run(opts: Opts) -> anyhow::Result<ExitCode> {
    let mut config = opts.config()?;
    let case = Case::new(&opts.case);

    match opts.command {
        Command::Run { args } => {
            let (parsed, application) = run_args(&config, &case, &args)?;
            config.interrupt = Interrupt::install()?;
            let runner = Runner::new(&config, &case);
            return Ok(report(runner.run_application(&parsed.options, &application, &parsed.args)?));
        }
        Command::Parallel { args } => {
            let (parsed, application) = run_args(&config, &case, &args)?;
            config.interrupt = Interrupt::install()?;
            let runner = Runner::new(&config, &case);
            return Ok(report(runner.run_parallel(&parsed.options, &application, &parsed.args)?));
        }
        Command::Nprocs { dict } => {
            return Ok(match parallel::number_of_processors(&config, &case, dict.as_deref()) {
                Ok(n) => {
                    println!("{}", n);
                    ExitCode::SUCCESS
                }
                Err(_) => {
                    println!("{}", FALLBACK_SUBDOMAINS);
                    ExitCode::FAILURE
                }
            });
        }
        Command::Application => {
            return Ok(match parallel::application(&config, &case) {
                Ok(application) => {
                    println!("{}", application);
                    ExitCode::SUCCESS
                }
                Err(_) => {
                    println!("{}", NO_APPLICATION);
                    ExitCode::FAILURE
                }
            });
        }
        Command::Clone { src, dst } => clone::clone_case(src, dst)?,
        Command::CloneParallel { src, dst, times } => clone::clone_parallel_case(src, dst, &times)?,
        Command::Clean { target } => {
            clean_target(target, &case)?;
        }
        Command::Restore0 { processor } => clone::restore_0_dir(&case, processor)?,
        Command::Remove { dir } => clone::remove_case(dir)?,
        Command::Image => match config.active_image() {
            Some(image) => println!("{}", image.display()),
            None => return Err(anyhow!("no container image found")),
        },
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    if let Err(e) = SimpleLogger::new().with_level(opts.log_level).init() {
        eprintln!("could not start logging: {}", e);
    }

    match run(opts) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
