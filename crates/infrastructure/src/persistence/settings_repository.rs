//! Engine settings persistence.
//!
//! Settings live in the platform config directory unless a path is given:
//! - Linux: ~/.config/conduit/settings.json
//! - macOS: ~/Library/Application Support/conduit/settings.json
//! - Windows: %APPDATA%/conduit/settings.json

use std::path::{Path, PathBuf};

use conduit_domain::EngineSettings;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use tokio::fs;
use tracing::debug;

/// Error type for settings operations.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// IO error during file operations.
    #[error("IO error on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid settings JSON.
    #[error("invalid settings file {path}: {source}")]
    Parse {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Settings could not be encoded.
    #[error("failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),

    /// Could not determine config directory.
    #[error("could not determine config directory")]
    NoConfigDir,
}

/// Loads and saves [`EngineSettings`] as JSON.
#[derive(Debug, Clone, Default)]
pub struct SettingsRepository {
    path: Option<PathBuf>,
}

impl SettingsRepository {
    /// Repository backed by the platform config directory.
    #[must_use]
    pub const fn new() -> Self {
        Self { path: None }
    }

    /// Repository backed by an explicit file.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Default location of the settings file, if the platform has one.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("conduit").join("settings.json"))
    }

    /// The file this repository reads and writes.
    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(Self::default_path)
    }

    /// Loads settings, returning defaults when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(&self) -> Result<EngineSettings, SettingsError> {
        let Some(path) = self.path() else {
            return Ok(EngineSettings::default());
        };

        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No settings file, using defaults");
                return Ok(EngineSettings::default());
            }
            Err(source) => return Err(SettingsError::Io { path, source }),
        };

        serde_json::from_slice(&content).map_err(|source| SettingsError::Parse { path, source })
    }

    /// Saves settings, creating the parent directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no config directory or the write fails.
    pub async fn save(&self, settings: &EngineSettings) -> Result<(), SettingsError> {
        let path = self.path().ok_or(SettingsError::NoConfigDir)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| io_error(parent, source))?;
        }

        let content = to_json_stable(settings)?;
        fs::write(&path, content)
            .await
            .map_err(|source| io_error(&path, source))?;
        debug!(path = %path.display(), "Saved settings");
        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> SettingsError {
    SettingsError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Two-space indented JSON with a trailing newline.
fn to_json_stable<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut buffer = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"  "));
    value.serialize(&mut serializer)?;
    buffer.push(b'\n');
    Ok(buffer)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use conduit_domain::ProxyConfig;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_path_is_under_conduit() {
        if let Some(path) = SettingsRepository::default_path() {
            assert!(path.ends_with("conduit/settings.json"));
        }
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let repo = SettingsRepository::at(dir.path().join("settings.json"));
        assert_eq!(repo.load().await.unwrap(), EngineSettings::default());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let repo = SettingsRepository::at(dir.path().join("nested").join("settings.json"));
        let settings = EngineSettings {
            default_timeout_ms: 1_500,
            proxy: ProxyConfig::with_url("socks5://127.0.0.1:1080"),
            ..Default::default()
        };

        repo.save(&settings).await.unwrap();
        let raw = std::fs::read_to_string(repo.path().unwrap()).unwrap();
        assert!(raw.ends_with("}\n"));
        assert!(raw.contains("  \"default_timeout_ms\": 1500"));

        assert_eq!(repo.load().await.unwrap(), settings);
    }

    #[tokio::test]
    async fn test_invalid_file_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = SettingsRepository::at(&path).load().await.unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }
}
