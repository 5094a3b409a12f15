use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::process::Interrupt;

/// Environment variable naming the container image to run applications in.
pub const IMAGE_VAR: &str = "ML_CFD_IMAGE";

/// Environment variable naming the toolkit environment script sourced inside
/// the container.
pub const BASHRC_VAR: &str = "ML_CFD_BASHRC";

/// Environment variable which, when set to anything non-empty, disables the
/// MPI launcher's default process-to-core binding.
pub const BIND_TO_NONE_VAR: &str = "OMPI_BIND_TO_NONE";

pub const DEFAULT_BASHRC: &str = "/usr/lib/openfoam/openfoam2206/etc/bashrc";
pub const DEFAULT_RUNTIME: &str = "singularity";
pub const DEFAULT_MPIRUN: &str = "mpirun";
pub const DEFAULT_DICTIONARY_TOOL: &str = "foamDictionary";

/// How dictionary entries such as `numberOfSubdomains` are looked up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DictionaryBackend {
    /// Ask the toolkit's dictionary utility (inside the container if one is
    /// configured).
    Toolkit,
    /// Parse the dictionary file in-process.
    Native,
}

/// Everything that used to be ambient process state: which image to run in,
/// how to initialize the toolkit inside it, and which launchers to use. A
/// `Config` is built once, usually by [`Config::from_env`], and then passed by
/// reference into every operation.
#[derive(Clone, Debug)]
pub struct Config {
    pub image: Option<PathBuf>,
    pub bashrc: PathBuf,
    pub bind_to_none: bool,
    pub container_runtime: OsString,
    pub mpirun: OsString,
    pub dictionary_tool: OsString,
    pub dictionary_backend: DictionaryBackend,
    /// Set when the operator asks to stop. Detached unless the caller
    /// installs signal handlers with [`Interrupt::install`].
    pub interrupt: Interrupt,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            image: None,
            bashrc: PathBuf::from(DEFAULT_BASHRC),
            bind_to_none: false,
            container_runtime: DEFAULT_RUNTIME.into(),
            mpirun: DEFAULT_MPIRUN.into(),
            dictionary_tool: DEFAULT_DICTIONARY_TOOL.into(),
            dictionary_backend: DictionaryBackend::Toolkit,
            interrupt: Interrupt::default(),
        }
    }
}

impl Config {
    /// Read `ML_CFD_IMAGE`, `ML_CFD_BASHRC` and `OMPI_BIND_TO_NONE` from the
    /// process environment. Unset or empty variables leave the defaults in
    /// place.
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var_os(key))
    }

    /// Same as `from_env`, but reading variables through the given function.
    pub fn from_vars<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let non_empty = |key: &str| var(key).filter(|value| !value.is_empty());
        let mut config = Config::default();

        if let Some(image) = non_empty(IMAGE_VAR) {
            config.image = Some(PathBuf::from(image));
        }
        if let Some(bashrc) = non_empty(BASHRC_VAR) {
            config.bashrc = PathBuf::from(bashrc);
        }
        config.bind_to_none = non_empty(BIND_TO_NONE_VAR).is_some();
        config
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let map: HashMap<String, OsString> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = Config::from_vars(vars(&[]));
        assert!(config.image.is_none());
        assert_eq!(config.bashrc, PathBuf::from(DEFAULT_BASHRC));
        assert!(!config.bind_to_none);
        assert_eq!(config.dictionary_backend, DictionaryBackend::Toolkit);
    }

    #[test]
    fn environment_values_are_picked_up() {
        let config = Config::from_vars(vars(&[
            (IMAGE_VAR, "/images/of.sif"),
            (BASHRC_VAR, "/opt/of/etc/bashrc"),
            (BIND_TO_NONE_VAR, "1"),
        ]));
        assert_eq!(config.image, Some(PathBuf::from("/images/of.sif")));
        assert_eq!(config.bashrc, PathBuf::from("/opt/of/etc/bashrc"));
        assert!(config.bind_to_none);
    }

    #[test]
    fn empty_variables_count_as_unset() {
        let config = Config::from_vars(vars(&[(IMAGE_VAR, ""), (BIND_TO_NONE_VAR, "")]));
        assert!(config.image.is_none());
        assert!(!config.bind_to_none);
    }
}
