//! Diagnostics configuration.
//!
//! Configuration is validated before any OS resource is touched, so an
//! invalid directory fails fast with `InvalidArgument`.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DiagError, Result};
#[cfg(any(test, feature = "fault-injection"))]
use crate::lifecycle::InitStage;

/// Default external memory-map tool.
pub const DEFAULT_PMAP_PROGRAM: &str = "pmap";

/// Configuration for [`initialize_with`](crate::initialize_with).
///
/// ```rust
/// use vigia_core::DiagConfig;
///
/// let config = DiagConfig::builder()
///     .log_dir("/tmp")
///     .remount_for_mandatory_lock(false)
///     .build();
/// assert_eq!(config.effective_log_dir().to_str(), Some("/tmp"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagConfig {
    /// Directory for LOG and DUMP files. `None` means the working directory.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Try to remount `/` with mandatory locking if it is not enabled.
    ///
    /// Failure (usually EPERM) is only a warning.
    #[serde(default = "default_remount")]
    pub remount_for_mandatory_lock: bool,

    /// External memory-map tool, probed once with `-V`.
    #[serde(default = "default_pmap_program")]
    pub pmap_program: String,

    /// Forces the named init stage to fail.
    #[cfg(any(test, feature = "fault-injection"))]
    #[serde(skip)]
    pub fail_at: Option<InitStage>,
}

const fn default_remount() -> bool {
    true
}

fn default_pmap_program() -> String {
    DEFAULT_PMAP_PROGRAM.to_string()
}

impl Default for DiagConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            remount_for_mandatory_lock: default_remount(),
            pmap_program: default_pmap_program(),
            #[cfg(any(test, feature = "fault-injection"))]
            fail_at: None,
        }
    }
}

impl DiagConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> DiagConfigBuilder {
        DiagConfigBuilder::new()
    }

    /// Configuration that writes into `dir`, everything else default.
    #[must_use]
    pub fn with_log_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Directory files are created in, with one trailing separator trimmed.
    #[must_use]
    pub fn effective_log_dir(&self) -> PathBuf {
        match &self.log_dir {
            Some(dir) => trim_trailing_separator(dir),
            None => PathBuf::from("."),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if `log_dir` is not an existing directory
    /// or `pmap_program` is empty.
    pub fn validate(&self) -> Result<()> {
        if let Some(dir) = &self.log_dir {
            if !dir.is_dir() {
                return Err(DiagError::invalid_argument(format!(
                    "log directory does not exist: {}",
                    dir.display()
                )));
            }
        }
        if self.pmap_program.trim().is_empty() {
            return Err(DiagError::invalid_argument("pmap_program cannot be empty"));
        }
        Ok(())
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| DiagError::file(path, e))?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from TOML text without validating it.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the text is not valid configuration.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| DiagError::invalid_argument(format!("failed to parse config: {e}")))
    }
}

fn trim_trailing_separator(dir: &Path) -> PathBuf {
    let raw = dir.as_os_str().as_bytes();
    match raw.strip_suffix(b"/") {
        Some(trimmed) if !trimmed.is_empty() => PathBuf::from(OsStr::from_bytes(trimmed)),
        _ => dir.to_path_buf(),
    }
}

/// Builder for [`DiagConfig`].
#[derive(Debug, Clone)]
pub struct DiagConfigBuilder {
    config: DiagConfig,
}

impl DiagConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: DiagConfig::default(),
        }
    }

    /// Directory for LOG and DUMP files.
    #[must_use]
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.log_dir = Some(dir.into());
        self
    }

    /// Whether to attempt the mandatory-lock remount of `/`.
    ///
    /// Default: `true`
    #[must_use]
    pub fn remount_for_mandatory_lock(mut self, value: bool) -> Self {
        self.config.remount_for_mandatory_lock = value;
        self
    }

    /// External memory-map tool.
    ///
    /// Default: `pmap`
    #[must_use]
    pub fn pmap_program(mut self, program: impl Into<String>) -> Self {
        self.config.pmap_program = program.into();
        self
    }

    /// Forces `stage` to fail during initialization.
    #[cfg(any(test, feature = "fault-injection"))]
    #[must_use]
    pub fn fail_at(mut self, stage: InitStage) -> Self {
        self.config.fail_at = Some(stage);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> DiagConfig {
        self.config
    }
}

impl Default for DiagConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = DiagConfig::default();
        assert_eq!(config.log_dir, None);
        assert!(config.remount_for_mandatory_lock);
        assert_eq!(config.pmap_program, "pmap");
        assert_eq!(config.effective_log_dir(), PathBuf::from("."));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_trailing_separator_trimmed_once() {
        let config = DiagConfig::with_log_dir("/tmp/");
        assert_eq!(config.effective_log_dir(), PathBuf::from("/tmp"));

        let config = DiagConfig::with_log_dir("/");
        assert_eq!(config.effective_log_dir(), PathBuf::from("/"));
    }

    #[test]
    fn test_validate_missing_directory() {
        let config = DiagConfig::with_log_dir("/definitely/not/a/dir");
        let err = config.validate().unwrap_err();
        assert!(matches!(err, DiagError::InvalidArgument(_)));
    }

    #[test]
    fn test_validate_file_is_not_directory() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = DiagConfig::with_log_dir(file.path());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_program() {
        let config = DiagConfig::builder().pmap_program("  ").build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml() {
        let config = DiagConfig::from_toml(
            r#"
            log_dir = "/var/tmp"
            remount_for_mandatory_lock = false
            "#,
        )
        .unwrap();
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/tmp")));
        assert!(!config.remount_for_mandatory_lock);
        assert_eq!(config.pmap_program, "pmap");
    }

    #[test]
    fn test_from_toml_rejects_garbage() {
        let err = DiagConfig::from_toml("log_dir = [").unwrap_err();
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn test_load_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigia.toml");
        std::fs::write(&path, "log_dir = \"/definitely/not/a/dir\"\n").unwrap();
        assert!(DiagConfig::load(&path).is_err());

        let body = format!("log_dir = {:?}\npmap_program = \"pmap\"\n", dir.path());
        std::fs::write(&path, body).unwrap();
        let config = DiagConfig::load(&path).unwrap();
        assert_eq!(config.log_dir.as_deref(), Some(dir.path()));
    }

    #[test]
    fn test_load_missing_file() {
        let err = DiagConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, DiagError::File { .. }));
    }

    #[test]
    fn test_builder_fail_at() {
        let config = DiagConfig::builder().fail_at(InitStage::DumpQueue).build();
        assert_eq!(config.fail_at, Some(InitStage::DumpQueue));
    }
}
