//! File-backed persistence for engine settings.

mod settings_repository;

pub use settings_repository::{SettingsError, SettingsRepository};
