use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "PANELCTL_CONFIG";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub dispatch: DispatchConfig,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DispatchConfig {
    /// Directory holding the administrative scripts.
    pub bin_dir: PathBuf,
    /// Fixed argv placed before the script path, e.g. ["sudo"].
    pub wrapper: Vec<String>,
    pub timeout_secs: u64,
    /// Per-stream capture limit; output past it is drained and dropped.
    pub max_output_bytes: usize,
    /// PATH handed to child processes (the rest of the environment is cleared).
    pub path: String,
    /// Operators allowed to run privileged operations.
    pub admins: Vec<String>,
    /// Reject query keys the operation does not declare instead of ignoring them.
    pub strict_params: bool,
    /// Extra variables for child processes. Kept last so it serializes as a trailing table.
    pub env: BTreeMap<String, String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let mut env = BTreeMap::new();
        env.insert("VESTA".to_string(), "/usr/local/vesta".to_string());
        Self {
            bin_dir: PathBuf::from("/usr/local/vesta/bin"),
            wrapper: Vec::new(),
            timeout_secs: 60,
            max_output_bytes: 64 * 1024,
            path: "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
            admins: vec!["admin".to_string()],
            strict_params: false,
            env,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AuditConfig {
    pub path: PathBuf,
    pub max_retention_days: u32,
    pub auto_archive: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: base_dir().join("audit.jsonl"),
            max_retention_days: 365, // Default 1 year
            auto_archive: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is unset.
    pub level: String,
    /// Write captured script output to the log when an operation fails.
    pub script_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            script_output: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DisplayConfig {
    pub language: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            language: "auto".to_string(),
        }
    }
}

impl Config {
    /// Loads from `explicit`, then `$PANELCTL_CONFIG`, then `~/.panelctl/config.toml`.
    /// Only the home default is created when missing.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let chosen = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        match chosen {
            Some(path) if path.exists() => Self::from_path(&path),
            Some(_) => Ok(Config::default()),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::from_path(&path)
                } else {
                    let config = Config::default();
                    config.save(&path)?;
                    Ok(config)
                }
            }
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parse config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Timeout and retention must both be non-zero.
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.timeout_secs == 0 {
            bail!("dispatch.timeout_secs must be at least 1");
        }
        if self.audit.max_retention_days == 0 {
            bail!("audit.max_retention_days must be at least 1");
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        base_dir().join("config.toml")
    }

    pub fn get_effective_language(&self) -> String {
        if self.display.language == "auto" {
            std::env::var("LANG")
                .unwrap_or_else(|_| "en_US".to_string())
                .split('.')
                .next()
                .unwrap_or("en")
                .to_string()
        } else {
            self.display.language.clone()
        }
    }
}

fn base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".panelctl")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[dispatch]\nbin_dir = \"/opt/panel/bin\"\ntimeout_secs = 5\n\n[logging]\nscript_output = true\n",
        )
        .unwrap();

        let config = Config::from_path(&path).unwrap();
        assert_eq!(config.dispatch.bin_dir, PathBuf::from("/opt/panel/bin"));
        assert_eq!(config.dispatch.timeout_secs, 5);
        assert_eq!(config.dispatch.admins, vec!["admin".to_string()]);
        assert!(config.logging.script_output);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.audit.max_retention_days, 365);
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.dispatch.wrapper = vec!["sudo".into()];
        config.display.language = "zh".into();
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.dispatch.wrapper, vec!["sudo".to_string()]);
        assert_eq!(loaded.get_effective_language(), "zh");
    }

    #[test]
    fn explicit_missing_path_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.dispatch.timeout_secs, 60);
        assert!(!path.exists());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        fs::write(&path, "[dispatch]\ntimeout_secs = 0\n").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("timeout_secs"));

        fs::write(&path, "[audit]\nmax_retention_days = 0\n").unwrap();
        let err = Config::from_path(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("max_retention_days"));
    }
}
