//! Engine configuration.
//!
//! Configuration can be assembled in code through [`EngineConfigBuilder`] or read
//! from a TOML document. Both paths validate with stillwater's `Validation` so
//! every problem is reported at once.

use crate::builder::BuildError;
use crate::core::{VersioningStrategy, DEFAULT_VERSIONING_PREFIX};
use serde::{Deserialize, Serialize};
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;
use thiserror::Error;

/// A single configuration problem.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigViolation {
    #[error("app_name must not be empty")]
    EmptyAppName,

    #[error("max_navigation_history must be at least 1")]
    ZeroHistoryLimit,

    #[error("base_uri '{0}' must start and end with '/'")]
    BaseUriNotAbsolute(String),
}

/// Settings of a [`ProcessEngine`](super::ProcessEngine).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub app_name: String,
    pub max_navigation_history: usize,
    /// Scope fields with this prefix are recorded in process histories.
    pub versioning_prefix: String,
    pub base_uri: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_name: "app".to_string(),
            max_navigation_history: 100,
            versioning_prefix: DEFAULT_VERSIONING_PREFIX.to_string(),
            base_uri: "/".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Parse and validate a TOML document. Missing keys fall back to defaults.
    ///
    /// ```
    /// use flowstate::process::EngineConfig;
    ///
    /// let config = EngineConfig::from_toml_str("app_name = \"shop\"").unwrap();
    /// assert_eq!(config.app_name, "shop");
    /// assert_eq!(config.max_navigation_history, 100);
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self, BuildError> {
        let config: EngineConfig =
            toml::from_str(source).map_err(|e| BuildError::Invalid(vec![e.to_string()]))?;
        config.validated()
    }

    pub fn validate(&self) -> Validation<(), NonEmptyVec<ConfigViolation>> {
        let mut checks: Vec<Validation<(), NonEmptyVec<ConfigViolation>>> = Vec::new();

        checks.push(if self.app_name.trim().is_empty() {
            Validation::fail(ConfigViolation::EmptyAppName)
        } else {
            Validation::success(())
        });

        checks.push(if self.max_navigation_history == 0 {
            Validation::fail(ConfigViolation::ZeroHistoryLimit)
        } else {
            Validation::success(())
        });

        checks.push(
            if self.base_uri.starts_with('/') && self.base_uri.ends_with('/') {
                Validation::success(())
            } else {
                Validation::fail(ConfigViolation::BaseUriNotAbsolute(self.base_uri.clone()))
            },
        );

        Validation::all_vec(checks).map(|_| ())
    }

    fn validated(self) -> Result<Self, BuildError> {
        match self.validate() {
            Validation::Success(_) => Ok(self),
            Validation::Failure(errors) => Err(BuildError::Invalid(
                errors.iter().map(ToString::to_string).collect(),
            )),
        }
    }

    pub fn versioning(&self) -> VersioningStrategy {
        VersioningStrategy::prefixed(self.versioning_prefix.clone())
    }
}

/// Builder for [`EngineConfig`].
#[derive(Clone, Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.config.app_name = name.into();
        self
    }

    pub fn max_navigation_history(mut self, max: usize) -> Self {
        self.config.max_navigation_history = max;
        self
    }

    pub fn versioning_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.versioning_prefix = prefix.into();
        self
    }

    pub fn base_uri(mut self, uri: impl Into<String>) -> Self {
        self.config.base_uri = uri.into();
        self
    }

    pub fn build(self) -> Result<EngineConfig, BuildError> {
        self.config.validated()
    }
}
