//! Repair-run configuration loaded from environment variables.
//!
//! All settings have defaults so the binary can run with zero configuration
//! against the default store location.

use std::path::PathBuf;

/// Repair-run configuration.
#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// Explicit database file to open.
    /// Env: `WANDER_DB_PATH`
    /// Default: the platform data directory
    /// (`~/.local/share/wander/wander.db` on Linux).
    pub db_path: Option<PathBuf>,

    /// Base directory of the filesystem media gateway.
    /// Env: `WANDER_MEDIA_ROOT`
    /// Default: `./media`
    pub media_root: PathBuf,

    /// Report what would change without writing anything.
    /// Env: `REPAIR_DRY_RUN` (true/false)
    /// Default: `false`
    pub dry_run: bool,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            media_root: PathBuf::from("./media"),
            dry_run: false,
        }
    }
}

impl RepairConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("WANDER_DB_PATH") {
            if !path.is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(path) = std::env::var("WANDER_MEDIA_ROOT") {
            config.media_root = PathBuf::from(path);
        }

        if let Ok(val) = std::env::var("REPAIR_DRY_RUN") {
            config.dry_run = val == "true" || val == "1";
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RepairConfig::default();
        assert!(config.db_path.is_none());
        assert_eq!(config.media_root, PathBuf::from("./media"));
        assert!(!config.dry_run);
    }
}
