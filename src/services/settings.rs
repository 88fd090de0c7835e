//! Daemon settings.
//!
//! Read once at startup from `$XDG_CONFIG_HOME/capyshell/launchd.json`;
//! a missing or unreadable file yields the defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    /// Minimum MemAvailable (kB) required before a launch; 0 disables the gate.
    pub min_mem_available: u64,
    /// Maximum swap in use (kB) tolerated before a launch; 0 disables.
    pub max_swap_used: u64,
    /// Applications whose proxy environment is managed by the app proxy.
    pub use_proxy_apps: HashSet<String>,
    /// Applications that must not receive the scale-factor variable.
    pub disable_scaling_apps: HashSet<String>,
    pub default_terminal: String,
    pub default_terminal_exec_arg: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            min_mem_available: 300 * 1024,
            max_swap_used: 600 * 1024,
            use_proxy_apps: HashSet::new(),
            disable_scaling_apps: HashSet::new(),
            default_terminal: "xterm".to_string(),
            default_terminal_exec_arg: "-e".to_string(),
        }
    }
}

impl Settings {
    /// Load from the config file, or return defaults if not found.
    pub fn load(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let settings = Settings::load(Path::new("/nonexistent/launchd.json"));
        assert_eq!(settings.default_terminal, "xterm");
        assert_eq!(settings.default_terminal_exec_arg, "-e");
    }

    #[test]
    fn partial_config_keeps_remaining_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("launchd.json");
        std::fs::write(
            &path,
            r#"{"default-terminal": "kitty", "use-proxy-apps": ["org.example.Edit"]}"#,
        )
        .unwrap();

        let settings = Settings::load(&path);
        assert_eq!(settings.default_terminal, "kitty");
        assert!(settings.use_proxy_apps.contains("org.example.Edit"));
        assert_eq!(settings.default_terminal_exec_arg, "-e");
        assert_eq!(settings.min_mem_available, 300 * 1024);
    }

    #[test]
    fn malformed_config_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("launchd.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(Settings::load(&path).default_terminal, "xterm");
    }
}
