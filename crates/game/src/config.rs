//! Game configuration: TOML file, then environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context};
use serde::Deserialize;
use tracing::info;

use deskside_agents::llm::DEFAULT_MODEL;
use deskside_agents::HR_ROLE;
use deskside_infra::queue::QueueManagerConfig;
use deskside_infra::storage::StorageConfig;
use deskside_infra::workers::WorkerSchedule;

pub const CONFIG_ENV: &str = "DESKSIDE_CONFIG";
pub const DATA_DIR_ENV: &str = "DESKSIDE_DATA_DIR";
pub const LOG_FILE_ENV: &str = "DESKSIDE_LOG_FILE";
pub const LLM_ENDPOINT_ENV: &str = "DESKSIDE_LLM_ENDPOINT";

const CONFIG_FILE_NAME: &str = "deskside.toml";

/// Upper bound for `queue.purge_after_days` (about a century).
pub const MAX_PURGE_AFTER_DAYS: u32 = 36_500;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
    pub storage: StorageSection,
    pub queue: QueueSection,
    pub ticket_generator: TicketGeneratorSection,
    pub hr_responder: HrResponderSection,
    pub customer_agent: WorkerSection,
    pub role_agents: WorkerSection,
    pub llm: LlmSection,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/databases"),
            log_file: PathBuf::from("logs/deskside.log"),
            storage: StorageSection::default(),
            queue: QueueSection::default(),
            ticket_generator: TicketGeneratorSection::default(),
            hr_responder: HrResponderSection::default(),
            customer_agent: WorkerSection::every(2),
            role_agents: WorkerSection {
                enabled: false,
                interval_minutes: 5,
            },
            llm: LlmSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub busy_timeout_secs: u64,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self { busy_timeout_secs: 30 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    pub poll_interval_ms: u64,
    pub handoff_capacity: usize,
    pub purge_after_days: u32,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            handoff_capacity: 16,
            purge_after_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub enabled: bool,
    pub interval_minutes: u64,
}

impl WorkerSection {
    fn every(interval_minutes: u64) -> Self {
        Self {
            enabled: true,
            interval_minutes,
        }
    }

    pub fn schedule(&self) -> WorkerSchedule {
        WorkerSchedule::every_minutes(self.interval_minutes)
    }
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self::every(2)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TicketGeneratorSection {
    pub enabled: bool,
    pub interval_minutes: u64,
    pub floor: u64,
}

impl TicketGeneratorSection {
    pub fn schedule(&self) -> WorkerSchedule {
        WorkerSchedule::every_minutes(self.interval_minutes)
    }
}

impl Default for TicketGeneratorSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 2,
            floor: deskside_agents::DEFAULT_TICKET_FLOOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HrResponderSection {
    pub enabled: bool,
    pub interval_minutes: u64,
    pub role: String,
    pub message_handling: bool,
    pub employee_concerns: bool,
}

impl HrResponderSection {
    pub fn schedule(&self) -> WorkerSchedule {
        WorkerSchedule::every_minutes(self.interval_minutes)
    }
}

impl Default for HrResponderSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 5,
            role: HR_ROLE.to_owned(),
            message_handling: true,
            employee_concerns: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// Text generation endpoint. Canned text is used when unset.
    pub endpoint: Option<String>,
    pub model: String,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: DEFAULT_MODEL.to_owned(),
        }
    }
}

impl GameConfig {
    /// Load from `DESKSIDE_CONFIG`, else `<data_dir>/deskside.toml` when it
    /// exists, else defaults; then apply environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let env = |key: &str| std::env::var(key).ok();

        let explicit = env(CONFIG_ENV).map(PathBuf::from);
        let fallback = env(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| GameConfig::default().data_dir)
            .join(CONFIG_FILE_NAME);

        let config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None if fallback.exists() => Self::from_file(&fallback)?,
            None => Self::default(),
        };
        let config = config.with_overrides(env);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::from_toml_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let config: GameConfig = toml::from_str(raw).context("failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DESKSIDE_DATA_DIR`, `DESKSIDE_LOG_FILE` and
    /// `DESKSIDE_LLM_ENDPOINT` from `lookup`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup(DATA_DIR_ENV) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup(LOG_FILE_ENV) {
            self.log_file = PathBuf::from(file);
        }
        if let Some(endpoint) = lookup(LLM_ENDPOINT_ENV) {
            self.llm.endpoint = Some(endpoint).filter(|e| !e.is_empty());
        }
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.queue.handoff_capacity > 0, "queue.handoff_capacity must be positive");
        ensure!(self.queue.poll_interval_ms > 0, "queue.poll_interval_ms must be positive");
        ensure!(
            self.queue.purge_after_days <= MAX_PURGE_AFTER_DAYS,
            "queue.purge_after_days must be at most {MAX_PURGE_AFTER_DAYS}"
        );
        for (section, minutes) in [
            ("ticket_generator", self.ticket_generator.interval_minutes),
            ("hr_responder", self.hr_responder.interval_minutes),
            ("customer_agent", self.customer_agent.interval_minutes),
            ("role_agents", self.role_agents.interval_minutes),
        ] {
            ensure!(minutes > 0, "{section}.interval_minutes must be positive");
        }
        ensure!(!self.hr_responder.role.trim().is_empty(), "hr_responder.role must not be empty");
        Ok(())
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig::in_dir(&self.data_dir)
            .with_busy_timeout(Duration::from_secs(self.storage.busy_timeout_secs))
    }

    pub fn queue_manager_config(&self) -> QueueManagerConfig {
        QueueManagerConfig {
            poll_interval: Duration::from_millis(self.queue.poll_interval_ms),
            handoff_capacity: self.queue.handoff_capacity,
            ..QueueManagerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = GameConfig::from_toml_str("").unwrap();
        assert_eq!(config, GameConfig::default());
        assert_eq!(config.ticket_generator.floor, 3);
        assert_eq!(config.hr_responder.role, "HR Manager");
        assert!(!config.role_agents.enabled);
        assert_eq!(config.hr_responder.schedule().interval, Duration::from_secs(300));
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = GameConfig::from_toml_str(
            r#"
            data_dir = "/tmp/deskside"

            [ticket_generator]
            floor = 5

            [hr_responder]
            employee_concerns = false

            [llm]
            endpoint = "http://localhost:11434/api/generate"
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/deskside"));
        assert_eq!(config.ticket_generator.floor, 5);
        assert_eq!(config.ticket_generator.interval_minutes, 2);
        assert!(config.hr_responder.message_handling);
        assert!(!config.hr_responder.employee_concerns);
        assert_eq!(config.llm.model, DEFAULT_MODEL);
        assert_eq!(config.storage_config().busy_timeout, Duration::from_secs(30));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(GameConfig::from_toml_str("[queue]\nhandoff_capacity = 0").is_err());
        assert!(GameConfig::from_toml_str("[customer_agent]\ninterval_minutes = 0").is_err());
        assert!(GameConfig::from_toml_str("data_dir = 7").is_err());
        assert!(GameConfig::from_toml_str("[queue]\npurge_after_days = 4294967295").is_err());
        assert!(GameConfig::from_toml_str("[queue]\npurge_after_days = 36500").is_ok());
    }

    #[test]
    fn environment_overrides_win() {
        let config = GameConfig::default().with_overrides(|key| match key {
            DATA_DIR_ENV => Some("/srv/deskside".into()),
            LLM_ENDPOINT_ENV => Some("http://llm:11434/api/generate".into()),
            _ => None,
        });
        assert_eq!(config.data_dir, PathBuf::from("/srv/deskside"));
        assert_eq!(config.log_file, PathBuf::from("logs/deskside.log"));
        assert_eq!(config.llm.endpoint.as_deref(), Some("http://llm:11434/api/generate"));
    }

    #[test]
    fn config_file_is_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[queue]\npurge_after_days = 7\n").unwrap();

        assert_eq!(GameConfig::from_file(&path).unwrap().queue.purge_after_days, 7);
        assert!(GameConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
