//! Sync Config - 동기화 엔진 통합 설정
//!
//! JSON (`cmsync.json`) 또는 TOML 파일에서 로드하고, `CMSYNC_*` 환경 변수로
//! 핵심 값을 덮어쓴다.

use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// 설정 파일명
pub const SYNC_CONFIG_FILE: &str = "cmsync.json";

/// 환경 변수 이름
pub const ENV_MAX_WORKERS: &str = "CMSYNC_MAX_WORKERS";
pub const ENV_TASK_TIMEOUT_MS: &str = "CMSYNC_TASK_TIMEOUT_MS";
pub const ENV_WATCHDOG_PERIOD_MS: &str = "CMSYNC_WATCHDOG_PERIOD_MS";
pub const ENV_BATCH_SIZE: &str = "CMSYNC_BATCH_SIZE";

// ============================================================================
// SyncConfig (통합)
// ============================================================================

/// CmSync 통합 설정
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default)]
    pub executor: ExecutorSettings,

    #[serde(default)]
    pub watchdog: WatchdogSettings,

    #[serde(default)]
    pub registry: RegistrySettings,

    #[serde(default)]
    pub dmi: DmiSettings,

    #[serde(default)]
    pub events: EventSettings,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// 글로벌 설정 로드 (없으면 기본값) + 환경 변수 적용
    pub fn load() -> Result<Self> {
        let mut config = match JsonStore::global() {
            Ok(store) => store
                .load_optional::<SyncConfig>(SYNC_CONFIG_FILE)?
                .unwrap_or_default(),
            Err(_) => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// 지정된 파일에서 로드 (`.toml` 확장자면 TOML, 그 외 JSON)
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.extension().and_then(|e| e.to_str()) == Some("toml") {
            let content = std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
            toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?
        } else {
            let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| Error::Config(format!("Invalid config path {}", path.display())))?;
            JsonStore::new(dir).load::<SyncConfig>(filename)?
        };
        debug!("Loaded sync config from {}", path.display());
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// 글로벌 설정 저장
    pub fn save_global(&self) -> Result<()> {
        JsonStore::global()?.save(SYNC_CONFIG_FILE, self)
    }

    // ========================================================================
    // Environment
    // ========================================================================

    /// `CMSYNC_*` 환경 변수 적용
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// 임의의 lookup 함수로 덮어쓰기 (테스트용으로 분리)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_MAX_WORKERS) {
            self.executor.max_workers = parse_env(ENV_MAX_WORKERS, &v)?;
        }
        if let Some(v) = lookup(ENV_TASK_TIMEOUT_MS) {
            self.executor.task_timeout_ms = parse_env(ENV_TASK_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_WATCHDOG_PERIOD_MS) {
            self.watchdog.period_ms = parse_env(ENV_WATCHDOG_PERIOD_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_BATCH_SIZE) {
            self.watchdog.batch_size = parse_env(ENV_BATCH_SIZE, &v)?;
        }
        Ok(())
    }

    // ========================================================================
    // Validation
    // ========================================================================

    pub fn validate(&self) -> Result<()> {
        if self.executor.max_workers == 0 {
            return Err(Error::Config("executor.maxWorkers must be at least 1".to_string()));
        }
        if self.executor.task_timeout_ms == 0 {
            return Err(Error::Config("executor.taskTimeoutMs must be positive".to_string()));
        }
        if self.watchdog.period_ms == 0 {
            return Err(Error::Config("watchdog.periodMs must be positive".to_string()));
        }
        if self.watchdog.batch_size == 0 {
            return Err(Error::Config("watchdog.batchSize must be at least 1".to_string()));
        }
        let root = &self.registry.root;
        if !root.starts_with('/') || root.len() < 2 || root[1..].contains('/') {
            return Err(Error::Config(format!(
                "registry.root must be a single absolute segment like /dmi-registry, got '{}'",
                root
            )));
        }
        if self.dmi.http_timeout_ms == 0 {
            return Err(Error::Config("dmi.httpTimeoutMs must be positive".to_string()));
        }
        if self.dmi.auth.enabled && self.dmi.auth.username.is_empty() {
            return Err(Error::Config(
                "dmi.auth.username is required when auth is enabled".to_string(),
            ));
        }
        if self.events.topic.trim().is_empty() {
            return Err(Error::Config("events.topic must not be empty".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} has invalid value '{}'", key, value)))
}

// ============================================================================
// Executor
// ============================================================================

/// 작업 실행기 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorSettings {
    /// 동시 실행 워커 수
    pub max_workers: usize,
    /// 실행 대기열 크기 (가득 차면 거부)
    pub queue_capacity: usize,
    /// 작업 타임아웃 (ms)
    pub task_timeout_ms: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_workers: 10,
            queue_capacity: 100,
            task_timeout_ms: 300_000,
        }
    }
}

impl ExecutorSettings {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }
}

// ============================================================================
// Watchdog
// ============================================================================

/// 워치독 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchdogSettings {
    pub enabled: bool,
    /// 주기 (ms)
    pub period_ms: u64,
    /// 배치당 최대 핸들 수
    pub batch_size: usize,
    /// 진행 중 표시 유지 시간 (초)
    pub in_progress_ttl_secs: u64,
    /// LOCKED 핸들 재시도 검사 주기 (ms, 0이면 매 tick)
    pub locked_retry_period_ms: u64,
    /// 재시도 대기 기본값 (ms); attempt N 이후 `base * 2^N` 대기
    pub retry_backoff_base_ms: u64,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            period_ms: 5_000,
            batch_size: 100,
            in_progress_ttl_secs: 600,
            locked_retry_period_ms: 300_000,
            retry_backoff_base_ms: 60_000,
        }
    }
}

impl WatchdogSettings {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn in_progress_ttl(&self) -> Duration {
        Duration::from_secs(self.in_progress_ttl_secs)
    }

    pub fn locked_retry_period(&self) -> Duration {
        Duration::from_millis(self.locked_retry_period_ms)
    }

    pub fn retry_backoff_base(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_base_ms)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// 레지스트리 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrySettings {
    /// 레지스트리 루트 경로
    pub root: String,
    /// SQLite 데이터 디렉토리 (None이면 `<data_dir>/cmsync`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            root: "/dmi-registry".to_string(),
            data_dir: None,
        }
    }
}

impl RegistrySettings {
    /// 실제 데이터 디렉토리
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        dirs::data_local_dir()
            .map(|d| d.join("cmsync"))
            .ok_or_else(|| Error::Config("Cannot find data directory".to_string()))
    }
}

// ============================================================================
// DMI
// ============================================================================

/// DMI 플러그인 호출 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DmiSettings {
    /// 플러그인 URL 뒤에 붙는 base path
    pub base_path: String,
    /// HTTP 요청 타임아웃 (ms)
    pub http_timeout_ms: u64,
    pub auth: DmiAuthSettings,
}

impl Default for DmiSettings {
    fn default() -> Self {
        Self {
            base_path: "dmi".to_string(),
            http_timeout_ms: 30_000,
            auth: DmiAuthSettings::default(),
        }
    }
}

impl DmiSettings {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

/// DMI basic auth
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DmiAuthSettings {
    pub enabled: bool,
    pub username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
}

// ============================================================================
// Events
// ============================================================================

/// LCM 이벤트 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventSettings {
    pub enabled: bool,
    /// 발행 토픽
    pub topic: String,
    /// 이벤트 source 필드
    pub source: String,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            topic: "ncmp-events".to_string(),
            source: "cmsync".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.executor.max_workers, 10);
        assert_eq!(config.watchdog.batch_size, 100);
        assert_eq!(config.registry.root, "/dmi-registry");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{ "executor": { "maxWorkers": 4 } }"#).unwrap();
        assert_eq!(config.executor.max_workers, 4);
        assert_eq!(config.executor.queue_capacity, 100);
        assert_eq!(config.events.topic, "ncmp-events");
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmsync.toml");
        std::fs::write(
            &path,
            "[watchdog]\nperiodMs = 250\nbatchSize = 3\nlockedRetryPeriodMs = 0\n\n[registry]\nroot = \"/reg\"\n",
        )
        .unwrap();

        let config = SyncConfig::load_from(&path).unwrap();
        assert_eq!(config.watchdog.period_ms, 250);
        assert_eq!(config.watchdog.batch_size, 3);
        assert_eq!(config.watchdog.locked_retry_period(), Duration::ZERO);
        assert_eq!(config.watchdog.retry_backoff_base(), Duration::from_secs(60));
        assert_eq!(config.registry.root, "/reg");
    }

    #[test]
    fn test_load_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        let mut config = SyncConfig::default();
        config.dmi.base_path = "plugin".to_string();
        store.save("custom.json", &config).unwrap();

        let loaded = SyncConfig::load_from(&dir.path().join("custom.json")).unwrap();
        assert_eq!(loaded.dmi.base_path, "plugin");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [(ENV_MAX_WORKERS, "3"), (ENV_BATCH_SIZE, "7")]
            .into_iter()
            .collect();
        let mut config = SyncConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.executor.max_workers, 3);
        assert_eq!(config.watchdog.batch_size, 7);

        let bad = config.apply_overrides(|k| (k == ENV_TASK_TIMEOUT_MS).then(|| "soon".to_string()));
        assert!(matches!(bad, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SyncConfig::default();
        config.executor.max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.registry.root = "dmi-registry".to_string();
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.dmi.auth.enabled = true;
        assert!(config.validate().is_err());
    }
}
