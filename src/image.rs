use std::path::{Path, PathBuf};

use log::{error, info};

use crate::config::Config;
use crate::error::{Error, Result};

impl Config {
    /// True if an image is configured and points at an existing file.
    pub fn image_found(&self) -> bool {
        self.active_image().is_some()
    }

    /// Return the configured image, but only if it exists.
    pub fn active_image(&self) -> Option<&Path> {
        self.image.as_deref().filter(|path| path.is_file())
    }

    /// Make `path` the active image. If there is no such file the error is
    /// reported and the configuration is left as it was.
    pub fn set_image(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();

        if path.is_file() {
            info!("Using image {}", path.display());
            self.image = Some(path);
            Ok(())
        } else {
            error!("Could not find image {}", path.display());
            Err(Error::ImageNotFound(path))
        }
    }
}

#[cfg(test)]
mod test {
    use crate::config::Config;
    use crate::error::Error;
    use std::fs;

    #[test]
    fn no_image_configured_is_not_found() {
        assert!(!Config::default().image_found());
    }

    #[test]
    fn dangling_image_path_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            image: Some(dir.path().join("missing.sif")),
            ..Config::default()
        };
        assert!(!config.image_found());
        assert!(config.active_image().is_none());
    }

    #[test]
    fn set_image_accepts_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("of2206.sif");
        fs::write(&image, b"").unwrap();

        let mut config = Config::default();
        config.set_image(&image).unwrap();
        assert!(config.image_found());
        assert_eq!(config.active_image(), Some(image.as_path()));
    }

    #[test]
    fn set_image_keeps_previous_state_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("good.sif");
        fs::write(&image, b"").unwrap();

        let mut config = Config::default();
        config.set_image(&image).unwrap();

        match config.set_image(dir.path().join("bad.sif")) {
            Err(Error::ImageNotFound(path)) => assert!(path.ends_with("bad.sif")),
            other => panic!("expected ImageNotFound, got {:?}", other),
        }
        assert_eq!(config.image.as_deref(), Some(image.as_path()));
    }
}
