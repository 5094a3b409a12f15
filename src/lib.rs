//! Caseflow drives the command-line applications of a CFD toolkit over
//! simulation case directories. It runs serial and MPI-parallel applications
//! with idempotent log files (an application whose `log.<app>` exists is not
//! run again), finds the number of subdomains a case is decomposed into,
//! clones serial and decomposed cases, and cleans cases back to their pre-run
//! state. Applications can optionally be run inside a container image, which
//! is configured through the environment (`ML_CFD_IMAGE`, `ML_CFD_BASHRC`) or
//! explicitly through a [`config::Config`].

pub mod case;
pub mod clean;
pub mod clone;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod image;
pub mod parallel;
pub mod process;
pub mod runner;

pub use error::{Error, Result};
