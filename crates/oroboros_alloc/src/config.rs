//! # Arena Configuration
//!
//! Arena settings are plain data and can be loaded from TOML:
//!
//! ```toml
//! name = "particles"
//! max_instances = 8
//!
//! [strategy]
//! block_size = 64
//! block_count = 4096
//! ```

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{AllocError, AllocResult};

/// Settings for one [`ExpandableArena`](crate::ExpandableArena).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaConfig<C> {
    /// Label used in log output.
    #[serde(default = "default_name")]
    pub name: String,
    /// Upper bound on strategy instances; `None` grows without limit.
    #[serde(default)]
    pub max_instances: Option<usize>,
    /// Configuration shared by every strategy instance.
    pub strategy: C,
}

fn default_name() -> String {
    String::from("arena")
}

impl<C> ArenaConfig<C> {
    /// Creates an unbounded arena configuration with the default name.
    #[must_use]
    pub fn new(strategy: C) -> Self {
        Self {
            name: default_name(),
            max_instances: None,
            strategy,
        }
    }

    /// Sets the log label.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Caps the number of strategy instances.
    #[must_use]
    pub const fn with_max_instances(mut self, max_instances: usize) -> Self {
        self.max_instances = Some(max_instances);
        self
    }
}

impl<C: DeserializeOwned> ArenaConfig<C> {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> AllocResult<Self> {
        toml::from_str(text).map_err(|error| AllocError::invalid_config(error.to_string()))
    }

    /// Loads a configuration from a TOML file.
    pub fn from_toml(path: impl AsRef<Path>) -> AllocResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|error| {
            AllocError::invalid_config(format!("cannot read {}: {error}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }
}
