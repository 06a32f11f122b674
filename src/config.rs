use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{AnchorError, AnchorResult};
use crate::perception::action_gate::GateConfig;

const CONFIG_FILE: &str = "anchor.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnchorConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub gate: GateConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_journal_path")]
    pub journal_path: PathBuf,
    /// Cache entries older than this recall as absent. Unset: entries live
    /// until a fingerprint change or an explicit invalidation.
    #[serde(default)]
    pub cache_max_age_secs: Option<u64>,
}

impl StorageConfig {
    pub fn cache_max_age(&self) -> Option<chrono::Duration> {
        self.cache_max_age_secs
            .and_then(|s| chrono::Duration::try_seconds(i64::try_from(s).ok()?))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            journal_path: default_journal_path(),
            cache_max_age_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Deadline for the isolated window-metadata query.
    #[serde(default = "default_meta_timeout_ms")]
    pub meta_timeout_ms: u64,
}

impl WatchdogConfig {
    pub fn meta_timeout(&self) -> Duration {
        Duration::from_millis(self.meta_timeout_ms)
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            meta_timeout_ms: default_meta_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Detections below this confidence are discarded before caching.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
        }
    }
}

fn default_meta_timeout_ms() -> u64 {
    5000
}

fn default_min_confidence() -> f32 {
    0.8
}

fn default_db_path() -> PathBuf {
    data_dir_or_cwd().join("ui_memory.db")
}

fn default_journal_path() -> PathBuf {
    data_dir_or_cwd().join("recovery_journal.json")
}

/// `%LOCALAPPDATA%\SeeClawAnchor` on Windows, `~/.local/share/SeeClawAnchor`
/// on Linux, falling back to `./data`.
fn data_dir_or_cwd() -> PathBuf {
    match dirs::data_local_dir() {
        Some(base) => base.join("SeeClawAnchor"),
        None => PathBuf::from("data"),
    }
}

fn resolve_config_path() -> AnchorResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join(CONFIG_FILE);
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join(CONFIG_FILE);
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(AnchorError::Config(format!(
        "{CONFIG_FILE} not found next to executable or in working directory"
    )))
}

pub fn load_config_from(path: &Path) -> AnchorResult<AnchorConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), db = %config.storage.db_path.display(), "config loaded");
    Ok(config)
}

pub fn load_config() -> AnchorResult<AnchorConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}

/// Like [`load_config`], but a missing or broken file yields the defaults.
pub fn load_config_or_default() -> AnchorConfig {
    match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "using default configuration");
            AnchorConfig::default()
        }
    }
}

pub fn parse_config(content: &str) -> AnchorResult<AnchorConfig> {
    let config: AnchorConfig = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

pub fn save_config(config: &AnchorConfig, path: &Path) -> AnchorResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

fn validate(config: &AnchorConfig) -> AnchorResult<()> {
    let gate = &config.gate;
    if !(0.0..=1.0).contains(&gate.min_density)
        || !(0.0..=1.0).contains(&gate.max_density)
        || gate.min_density >= gate.max_density
    {
        return Err(AnchorError::Config(format!(
            "gate density band must satisfy 0 <= min < max <= 1 (got {} .. {})",
            gate.min_density, gate.max_density
        )));
    }
    if gate.canny_low < 0.0 || gate.canny_low > gate.canny_high {
        return Err(AnchorError::Config(format!(
            "gate canny thresholds must satisfy 0 <= low <= high (got {} .. {})",
            gate.canny_low, gate.canny_high
        )));
    }
    if !(0.0..=1.0).contains(&config.vision.min_confidence) {
        return Err(AnchorError::Config(format!(
            "vision.min_confidence must be within [0, 1] (got {})",
            config.vision.min_confidence
        )));
    }
    if config.watchdog.meta_timeout_ms == 0 {
        return Err(AnchorError::Config("watchdog.meta_timeout_ms must be positive".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.watchdog.meta_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.vision.min_confidence, 0.8);
        assert_eq!(cfg.gate, GateConfig::default());
        assert_eq!(cfg.storage.cache_max_age(), None);
        assert!(cfg.storage.db_path.ends_with("ui_memory.db"));
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = parse_config(
            r#"
            [storage]
            db_path = "/tmp/anchor/ui.db"
            cache_max_age_secs = 3600

            [watchdog]
            meta_timeout_ms = 1500

            [vision]
            min_confidence = 0.9

            [gate]
            radius = 20
            "#,
        )
        .unwrap();

        assert_eq!(cfg.storage.db_path, PathBuf::from("/tmp/anchor/ui.db"));
        assert!(cfg.storage.journal_path.ends_with("recovery_journal.json"));
        assert_eq!(cfg.storage.cache_max_age(), Some(chrono::Duration::hours(1)));
        assert_eq!(cfg.watchdog.meta_timeout(), Duration::from_millis(1500));
        assert_eq!(cfg.vision.min_confidence, 0.9);
        assert_eq!(cfg.gate.radius, 20);
        assert_eq!(cfg.gate.max_density, 0.25);
    }

    #[test]
    fn inverted_density_band_is_rejected() {
        let err = parse_config("[gate]\nmin_density = 0.3\nmax_density = 0.1\n").unwrap_err();
        assert!(matches!(err, AnchorError::Config(_)));
    }

    #[test]
    fn inverted_canny_thresholds_are_rejected() {
        let err = parse_config("[gate]\ncanny_low = 200.0\n").unwrap_err();
        assert!(err.to_string().contains("canny"));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut cfg = AnchorConfig::default();
        cfg.watchdog.meta_timeout_ms = 750;
        save_config(&cfg, &path).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), cfg);
    }
}
