//! Factory configuration.
//!
//! Configuration is plain data with serde defaults, so a YAML file only needs
//! the keys it changes:
//!
//! ```yaml
//! compile_cache: true
//! cache_path: /var/cache/views
//! strict_variables: false
//! tags:
//!   content_open: "[["
//!   content_close: "]]"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stencil_lexer::TagConfig;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reuse compiled programs while their source is unchanged.
    pub compile_cache: bool,
    /// Directory for compiled programs. In memory when unset.
    pub cache_path: Option<PathBuf>,
    /// Tag delimiters and statement marker.
    pub tags: TagConfig,
    /// Treat undefined names as render errors instead of empty values.
    pub strict_variables: bool,
    /// Upper bound on iterations of a single `@for` or `@while` loop.
    pub max_loop_iterations: usize,
    /// How deep custom directive expansions may nest.
    pub max_expansion_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compile_cache: true,
            cache_path: None,
            tags: TagConfig::default(),
            strict_variables: false,
            max_loop_iterations: 10_000,
            max_expansion_depth: 8,
        }
    }
}

impl Config {
    /// Parses configuration from YAML and validates it.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a YAML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        self.tags
            .validate()
            .map_err(|err| Error::Config(err.to_string()))?;
        if self.max_loop_iterations == 0 {
            return Err(Error::Config("max_loop_iterations must be positive".into()));
        }
        Ok(())
    }
}
