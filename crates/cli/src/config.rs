//! hsync configuration file parsing (.hsync.toml)

use std::path::{Path, PathBuf};

/// Project configuration, loaded from the directory hsync is run in.
///
/// Command-line arguments always win over the file. The config lives
/// outside the mirror directory because everything inside it belongs to
/// the server.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct HsyncConfig {
    /// Remote repository URL
    pub url: Option<String>,

    /// Local mirror directory
    pub dest: Option<PathBuf>,

    /// Seconds between syncs in watch mode
    pub interval: Option<u64>,
}

/// Config file name
pub const CONFIG_FILE: &str = ".hsync.toml";

impl HsyncConfig {
    /// Load config from `dir`.
    ///
    /// Returns default config if .hsync.toml doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(dir: &Path) -> color_eyre::Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
url = "https://mirror.example.net/scenery"
dest = "scenery"
interval = 600
"#;

        let config: HsyncConfig = toml::from_str(toml).unwrap();
        assert_eq!(
            config.url.as_deref(),
            Some("https://mirror.example.net/scenery")
        );
        assert_eq!(config.dest.as_deref(), Some(Path::new("scenery")));
        assert_eq!(config.interval, Some(600));
    }

    #[test]
    fn test_missing_fields_default_to_none() {
        let config: HsyncConfig = toml::from_str("url = \"https://a.example\"\n").unwrap();
        assert!(config.url.is_some());
        assert!(config.dest.is_none());
        assert!(config.interval.is_none());
    }
}
