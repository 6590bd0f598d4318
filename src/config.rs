//! Emulator configuration.
//!
//! Everything that matters per run arrives on the command line; the config
//! file only carries defaults for it. A `xmega-emu.toml` in the working
//! directory takes precedence over `~/.config/xmega-emu/config.toml`, and
//! the first file that parses is used as-is, there is no merging between
//! files. `XMEGA_EMU_MODEL` and `XMEGA_EMU_SYS_TICKS` override the file.
//!
//! ```toml
//! # xmega-emu.toml
//! model = "atxmega128a1"
//! # stop after this many SYS clock ticks; omit to run until interrupted
//! sys_ticks = 1000000
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Deserialize;

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Default run settings, overridable from the command line.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Device model to emulate.
    pub model: String,

    /// Stop after this many SYS clock ticks.
    pub sys_ticks: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: "atxmega128a1".to_string(),
            sys_ticks: None,
        }
    }
}

impl Config {
    /// The process-wide configuration, resolved on first use.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::resolve)
    }

    /// Config file locations, most specific first.
    fn candidates() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("xmega-emu.toml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("xmega-emu").join("config.toml"));
        }
        paths
    }

    /// Pick the first config file that exists and parses, fall back to the
    /// defaults, then let the environment have the last word.
    fn resolve() -> Self {
        let mut config = Self::candidates()
            .iter()
            .find_map(|path| Self::read(path))
            .unwrap_or_default();
        config.apply_env();
        log::debug!("configuration: {:?}", config);
        config
    }

    fn read(path: &Path) -> Option<Self> {
        let text = fs::read_to_string(path).ok()?;
        match toml::from_str(&text) {
            Ok(config) => {
                log::info!("using configuration from {}", path.display());
                Some(config)
            }
            Err(e) => {
                // a broken file should not silently revert to defaults
                log::warn!("ignoring {}: {}", path.display(), e);
                None
            }
        }
    }

    fn apply_env(&mut self) {
        if let Ok(model) = env::var("XMEGA_EMU_MODEL") {
            self.model = model;
        }
        if let Ok(ticks) = env::var("XMEGA_EMU_SYS_TICKS") {
            match ticks.parse() {
                Ok(ticks) => self.sys_ticks = Some(ticks),
                Err(_) => log::warn!("ignoring XMEGA_EMU_SYS_TICKS: not a tick count: {}", ticks),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_run_the_128a1_forever() {
        let config = Config::default();
        assert_eq!(config.model, "atxmega128a1");
        assert_eq!(config.sys_ticks, None);
    }

    #[test]
    fn test_file_settings_parse() {
        let config: Config = toml::from_str(
            "model = \"atxmega128a1\"\n\
             sys_ticks = 250000\n",
        )
        .unwrap();
        assert_eq!(config.model, "atxmega128a1");
        assert_eq!(config.sys_ticks, Some(250_000));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str("sys_ticks = 8\n").unwrap();
        assert_eq!(config.model, "atxmega128a1");
        assert_eq!(config.sys_ticks, Some(8));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        // typos in the file should fail loudly rather than be ignored
        assert!(toml::from_str::<Config>("sys_tick = 8\n").is_err());
    }

    #[test]
    fn test_working_directory_file_is_preferred() {
        let candidates = Config::candidates();
        assert_eq!(candidates[0], PathBuf::from("xmega-emu.toml"));
    }
}
