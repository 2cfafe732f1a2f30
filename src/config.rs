use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{IoContext, LedgerError, LedgerResult};

pub const HOME_ENV_VAR: &str = "BUDGET_TRACKER_HOME";
const DEFAULT_HOME_DIR_NAME: &str = "budget-tracker";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageSection,
    pub backup: BackupSection,
    pub automation: AutomationSection,
    pub ledger: LedgerSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Relative paths resolve against the application home.
    pub db_file: PathBuf,
    pub rules_dir: PathBuf,
    pub backup_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSection {
    pub auto_enabled: bool,
    pub interval_days: i64,
    pub keep_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationSection {
    /// Upper bound of occurrences one entry may materialize in a single run.
    pub max_catch_up: usize,
    pub watch_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    pub currency: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            db_file: PathBuf::from("ledger/budget.db"),
            rules_dir: PathBuf::from("rules"),
            backup_dir: PathBuf::from("backups"),
        }
    }
}

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            auto_enabled: true,
            interval_days: 7,
            keep_count: 10,
        }
    }
}

impl Default for AutomationSection {
    fn default() -> Self {
        Self {
            max_catch_up: 60,
            watch_interval_secs: 3600,
        }
    }
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            currency: "TRY".to_string(),
        }
    }
}

/// Absolute locations derived from the home directory and the config.
#[derive(Debug, Clone, Serialize)]
pub struct AppPaths {
    pub home: PathBuf,
    pub config_file: PathBuf,
    pub db_path: PathBuf,
    pub rules_dir: PathBuf,
    pub backup_dir: PathBuf,
}

impl AppPaths {
    pub fn from_config(home: &Path, cfg: &AppConfig) -> Self {
        let resolve = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                home.join(p)
            }
        };
        Self {
            home: home.to_path_buf(),
            config_file: config_path(home),
            db_path: resolve(&cfg.storage.db_file),
            rules_dir: resolve(&cfg.storage.rules_dir),
            backup_dir: resolve(&cfg.storage.backup_dir),
        }
    }
}

pub fn resolve_home(explicit: Option<&Path>) -> LedgerResult<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    if let Ok(v) = std::env::var(HOME_ENV_VAR) {
        if !v.trim().is_empty() {
            return Ok(PathBuf::from(v.trim()));
        }
    }
    dirs::data_dir()
        .map(|d| d.join(DEFAULT_HOME_DIR_NAME))
        .ok_or_else(|| LedgerError::Config("cannot resolve a data directory for this platform".into()))
}

pub fn config_path(home: &Path) -> PathBuf {
    home.join(CONFIG_FILE_NAME)
}

pub fn load_config(home: &Path) -> LedgerResult<AppConfig> {
    let p = config_path(home);
    if !p.exists() {
        return Ok(AppConfig::default());
    }
    let s = fs::read_to_string(&p).io_context(&format!("read {}", p.display()))?;
    toml::from_str(&s).map_err(|e| LedgerError::Config(format!("parse {}: {e}", p.display())))
}

pub fn save_config(home: &Path, cfg: &AppConfig) -> LedgerResult<PathBuf> {
    fs::create_dir_all(home).io_context(&format!("create {}", home.display()))?;
    let p = config_path(home);
    let s = toml::to_string_pretty(cfg)
        .map_err(|e| LedgerError::Config(format!("serialize config: {e}")))?;
    fs::write(&p, s).io_context(&format!("write {}", p.display()))?;
    Ok(p)
}

/// Returns `true` when a file was written.
pub fn init_config(home: &Path, force: bool) -> LedgerResult<bool> {
    let p = config_path(home);
    if p.exists() && !force {
        return Ok(false);
    }
    save_config(home, &AppConfig::default())?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_home() -> PathBuf {
        std::env::temp_dir().join(format!(
            "budget_tracker_config_test_{}_{}",
            std::process::id(),
            Uuid::new_v4()
        ))
    }

    #[test]
    fn missing_file_yields_defaults_and_partial_file_fills_gaps() {
        let home = temp_home();
        let cfg = load_config(&home).expect("defaults");
        assert_eq!(cfg.backup.interval_days, 7);
        assert_eq!(cfg.ledger.currency, "TRY");

        fs::create_dir_all(&home).expect("mkdir");
        fs::write(config_path(&home), "[backup]\nkeep_count = 3\n").expect("write");
        let cfg = load_config(&home).expect("partial");
        assert_eq!(cfg.backup.keep_count, 3);
        assert!(cfg.backup.auto_enabled);
        assert_eq!(cfg.automation.max_catch_up, 60);
        let _ = fs::remove_dir_all(&home);
    }

    #[test]
    fn init_does_not_overwrite_without_force() {
        let home = temp_home();
        assert!(init_config(&home, false).expect("first init"));
        let mut cfg = load_config(&home).expect("load");
        cfg.backup.auto_enabled = false;
        save_config(&home, &cfg).expect("save");
        assert!(!init_config(&home, false).expect("second init"));
        assert!(!load_config(&home).expect("reload").backup.auto_enabled);
        assert!(init_config(&home, true).expect("forced init"));
        assert!(load_config(&home).expect("reload").backup.auto_enabled);
        let _ = fs::remove_dir_all(&home);
    }

    #[test]
    fn paths_resolve_relative_entries_against_home() {
        let home = PathBuf::from("/srv/budget");
        let mut cfg = AppConfig::default();
        cfg.storage.backup_dir = PathBuf::from("/mnt/backups");
        let paths = AppPaths::from_config(&home, &cfg);
        assert_eq!(paths.db_path, PathBuf::from("/srv/budget/ledger/budget.db"));
        assert_eq!(paths.backup_dir, PathBuf::from("/mnt/backups"));
    }
}
