//! Configuration Vault – reads/writes `~/.roadwise/config.toml`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use roadwise_kernel::SafetyLimits;
use roadwise_memory::DedupThresholds;
use roadwise_runtime::{AdvisoryLoopConfig, OrchestratorConfig};
use roadwise_types::RoadwiseError;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

// ─────────────────────────────────────────────────────────────────────────────
// Secrets
// ─────────────────────────────────────────────────────────────────────────────

/// An API key.  Never printed, wiped from memory on drop.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn expose(&self) -> Option<String> {
        (!self.is_empty()).then(|| self.0.trim().to_string())
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_empty() { "<not set>" } else { "<redacted>" })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────────────────────────

/// Primary reasoning backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Anthropic,
    OpenAI,
    Ollama,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Anthropic => write!(f, "anthropic"),
            Provider::OpenAI => write!(f, "openai"),
            Provider::Ollama => write!(f, "ollama"),
        }
    }
}

impl FromStr for Provider {
    type Err = RoadwiseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Provider::Anthropic),
            "openai" => Ok(Provider::OpenAI),
            "ollama" => Ok(Provider::Ollama),
            other => Err(RoadwiseError::Configuration(format!(
                "unknown provider '{other}'"
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

/// Persisted configuration stored in `~/.roadwise/config.toml`.
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: Provider,
    /// Model name; empty selects the provider's default.
    pub model: String,
    /// Append a local Ollama backend after the primary one.
    pub ollama_fallback: bool,
    pub ollama_model: String,

    pub anthropic_url: String,
    pub openai_url: String,
    pub ollama_url: String,

    #[serde(skip_serializing_if = "ApiKey::is_empty")]
    pub anthropic_api_key: ApiKey,
    #[serde(skip_serializing_if = "ApiKey::is_empty")]
    pub openai_api_key: ApiKey,
    #[serde(skip_serializing_if = "ApiKey::is_empty")]
    pub fl511_api_key: ApiKey,

    pub rate_hz: f64,
    pub reasoning_timeout_s: f64,
    pub cycle_deadline_s: f64,
    pub advisory_max_age_s: f64,
    pub require_frame: bool,

    pub max_speed_ms: f32,
    pub max_step_ms: f32,
    pub min_confidence: f32,

    pub dedup_radius_m: f64,
    pub dedup_window_s: f64,
    pub ring_capacity: usize,

    /// SQLite observation log; unset means `~/.roadwise/observations.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation_db: Option<PathBuf>,
    /// JSON context snapshot re-read every tick.
    pub context_path: PathBuf,
    /// JPEG camera frame re-read every tick.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let limits = SafetyLimits::default();
        let dedup = DedupThresholds::default();
        let loop_config = AdvisoryLoopConfig::default();
        let orchestrator = OrchestratorConfig::default();
        Self {
            provider: Provider::default(),
            model: String::new(),
            ollama_fallback: false,
            ollama_model: "llava".to_string(),
            anthropic_url: roadwise_runtime::reasoning::ANTHROPIC_URL.to_string(),
            openai_url: "https://api.openai.com".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            anthropic_api_key: ApiKey::default(),
            openai_api_key: ApiKey::default(),
            fl511_api_key: ApiKey::default(),
            rate_hz: loop_config.rate_hz,
            reasoning_timeout_s: orchestrator.reasoning_timeout.as_secs_f64(),
            cycle_deadline_s: loop_config.cycle_deadline.as_secs_f64(),
            advisory_max_age_s: loop_config.advisory_max_age.as_secs_f64(),
            require_frame: orchestrator.require_frame,
            max_speed_ms: limits.max_speed_ms,
            max_step_ms: limits.max_step_ms,
            min_confidence: limits.min_confidence,
            dedup_radius_m: dedup.radius_m,
            dedup_window_s: dedup.window_s,
            ring_capacity: roadwise_memory::dedup::DEFAULT_RING_CAPACITY,
            observation_db: None,
            context_path: PathBuf::from("roadwise-context.json"),
            frame_path: None,
        }
    }
}

fn seconds(name: &str, value: f64) -> Result<Duration, RoadwiseError> {
    Duration::try_from_secs_f64(value)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| RoadwiseError::Configuration(format!("{name} must be positive, got {value}")))
}

impl Config {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), RoadwiseError> {
        if !(self.rate_hz.is_finite() && self.rate_hz > 0.0) {
            return Err(RoadwiseError::Configuration(format!(
                "rate_hz must be positive, got {}",
                self.rate_hz
            )));
        }
        seconds("reasoning_timeout_s", self.reasoning_timeout_s)?;
        seconds("cycle_deadline_s", self.cycle_deadline_s)?;
        seconds("advisory_max_age_s", self.advisory_max_age_s)?;
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(RoadwiseError::Configuration(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        if self.max_speed_ms <= 0.0 || self.max_step_ms <= 0.0 {
            return Err(RoadwiseError::Configuration(
                "max_speed_ms and max_step_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn safety_limits(&self) -> SafetyLimits {
        SafetyLimits {
            max_speed_ms: self.max_speed_ms,
            max_step_ms: self.max_step_ms,
            min_confidence: self.min_confidence,
            ..SafetyLimits::default()
        }
    }

    pub fn dedup_thresholds(&self) -> DedupThresholds {
        DedupThresholds {
            radius_m: self.dedup_radius_m,
            window_s: self.dedup_window_s,
        }
    }

    pub fn loop_config(&self) -> Result<AdvisoryLoopConfig, RoadwiseError> {
        Ok(AdvisoryLoopConfig {
            rate_hz: self.rate_hz,
            cycle_deadline: seconds("cycle_deadline_s", self.cycle_deadline_s)?,
            advisory_max_age: seconds("advisory_max_age_s", self.advisory_max_age_s)?,
        })
    }

    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig, RoadwiseError> {
        Ok(OrchestratorConfig {
            reasoning_timeout: seconds("reasoning_timeout_s", self.reasoning_timeout_s)?,
            require_frame: self.require_frame,
            merge_policy: roadwise_kernel::MergePolicy {
                min_confidence: self.min_confidence,
                ..roadwise_kernel::MergePolicy::default()
            },
        })
    }

    pub fn observation_db_path(&self) -> PathBuf {
        self.observation_db
            .clone()
            .unwrap_or_else(|| roadwise_dir(&home_dir()).join("observations.db"))
    }

    /// Endpoint probed by `check_connectivity`.
    pub fn probe_url(&self) -> &str {
        match self.provider {
            Provider::Anthropic => &self.anthropic_url,
            Provider::OpenAI => &self.openai_url,
            Provider::Ollama => &self.ollama_url,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Paths
// ─────────────────────────────────────────────────────────────────────────────

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn roadwise_dir(home: &str) -> PathBuf {
    PathBuf::from(home).join(".roadwise")
}

/// Return the path to `~/.roadwise/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    roadwise_dir(home).join("config.toml")
}

// ─────────────────────────────────────────────────────────────────────────────
// Load / save
// ─────────────────────────────────────────────────────────────────────────────

/// Load the config from disk with environment overrides applied.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, RoadwiseError> {
    let mut cfg = load_from(&config_path())?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

/// Load the config from a specific path, without overrides.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, RoadwiseError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        RoadwiseError::Configuration(format!("failed to read {}: {e}", path.display()))
    })?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| RoadwiseError::Configuration(format!("failed to parse config: {e}")))?;
    Ok(Some(cfg))
}

/// Apply `ROADWISE_*` environment variable overrides to `cfg`.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROADWISE_PROVIDER` | `provider` |
/// | `ROADWISE_MODEL` | `model` |
/// | `ROADWISE_OLLAMA_URL` | `ollama_url` |
/// | `ROADWISE_ANTHROPIC_API_KEY` | `anthropic_api_key` |
/// | `ROADWISE_OPENAI_API_KEY` | `openai_api_key` |
/// | `ROADWISE_FL511_API_KEY` | `fl511_api_key` |
/// | `ROADWISE_RATE_HZ` | `rate_hz` |
/// | `ROADWISE_CONTEXT_PATH` | `context_path` |
/// | `ROADWISE_FRAME_PATH` | `frame_path` |
/// | `ROADWISE_OBSERVATION_DB` | `observation_db` |
///
/// Values that do not parse are ignored.
pub fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(p) = lookup("ROADWISE_PROVIDER").and_then(|v| v.parse().ok()) {
        cfg.provider = p;
    }
    if let Some(v) = lookup("ROADWISE_MODEL") {
        cfg.model = v;
    }
    if let Some(v) = lookup("ROADWISE_OLLAMA_URL") {
        cfg.ollama_url = v;
    }
    if let Some(v) = lookup("ROADWISE_ANTHROPIC_API_KEY") {
        cfg.anthropic_api_key = ApiKey::new(v);
    }
    if let Some(v) = lookup("ROADWISE_OPENAI_API_KEY") {
        cfg.openai_api_key = ApiKey::new(v);
    }
    if let Some(v) = lookup("ROADWISE_FL511_API_KEY") {
        cfg.fl511_api_key = ApiKey::new(v);
    }
    if let Some(hz) = lookup("ROADWISE_RATE_HZ").and_then(|v| v.parse::<f64>().ok()) {
        cfg.rate_hz = hz;
    }
    if let Some(v) = lookup("ROADWISE_CONTEXT_PATH") {
        cfg.context_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("ROADWISE_FRAME_PATH") {
        cfg.frame_path = Some(PathBuf::from(v));
    }
    if let Some(v) = lookup("ROADWISE_OBSERVATION_DB") {
        cfg.observation_db = Some(PathBuf::from(v));
    }
}

/// Save the config to disk, creating `~/.roadwise/` if necessary.
pub fn save(cfg: &Config) -> Result<(), RoadwiseError> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), RoadwiseError> {
    let io_err = |what: &str, e: std::io::Error| {
        RoadwiseError::Configuration(format!("failed to {what} {}: {e}", path.display()))
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err("create directory for", e))?;
        // Owner only (rwx------).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| io_err("restrict directory of", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| RoadwiseError::Configuration(format!("failed to serialize config: {e}")))?;
    // Owner read/write only (rw-------).
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| io_err("write", e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| io_err("write", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn debug_redacts_api_keys() {
        let mut cfg = Config::default();
        cfg.anthropic_api_key = ApiKey::new("sk-ant-super-secret");
        cfg.fl511_api_key = ApiKey::new("fl511-secret");
        let debug = format!("{cfg:?}");
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("fl511-secret"));
        assert!(debug.contains("<redacted>"));
        assert!(debug.contains("<not set>"), "openai key is unset");
    }

    #[test]
    fn blank_keys_are_not_exposed() {
        assert_eq!(ApiKey::new("   ").expose(), None);
        assert_eq!(ApiKey::new(" k ").expose().as_deref(), Some("k"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).unwrap();

        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_keeps_keys_and_limits() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let mut cfg = Config::default();
        cfg.provider = Provider::Ollama;
        cfg.fl511_api_key = ApiKey::new("abc");
        cfg.max_step_ms = 10.0;
        save_to(&cfg, &path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("anthropic_api_key"), "empty keys are not written");

        let loaded = load_from(&path).unwrap().unwrap();
        assert_eq!(loaded.provider, Provider::Ollama);
        assert_eq!(loaded.fl511_api_key.expose().as_deref(), Some("abc"));
        assert_eq!(loaded.safety_limits().max_step_ms, 10.0);
        assert_eq!(loaded.rate_hz, 2.0);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "provider = \"openai\"\nrate_hz = 4.0\n").unwrap();
        let cfg = load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.provider, Provider::OpenAI);
        assert_eq!(cfg.rate_hz, 4.0);
        assert_eq!(cfg.dedup_thresholds(), DedupThresholds::default());
        assert!(cfg.require_frame);
    }

    #[test]
    fn malformed_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "rate_hz = \"fast\"").unwrap();
        assert!(matches!(load_from(&path), Err(RoadwiseError::Configuration(_))));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).unwrap().is_none());
    }

    #[test]
    fn config_path_points_to_roadwise_dir() {
        let p = config_path_for_home("/home/driver");
        assert_eq!(p, PathBuf::from("/home/driver/.roadwise/config.toml"));
    }

    #[test]
    fn overrides_apply_and_bad_values_are_ignored() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            env(&[
                ("ROADWISE_PROVIDER", "Ollama"),
                ("ROADWISE_MODEL", "llava:13b"),
                ("ROADWISE_FL511_API_KEY", "key"),
                ("ROADWISE_RATE_HZ", "not-a-number"),
                ("ROADWISE_FRAME_PATH", "/tmp/frame.jpg"),
            ]),
        );
        assert_eq!(cfg.provider, Provider::Ollama);
        assert_eq!(cfg.model, "llava:13b");
        assert!(!cfg.fl511_api_key.is_empty());
        assert_eq!(cfg.rate_hz, 2.0);
        assert_eq!(cfg.frame_path, Some(PathBuf::from("/tmp/frame.jpg")));
    }

    #[test]
    fn unknown_provider_override_is_ignored() {
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, env(&[("ROADWISE_PROVIDER", "skynet")]));
        assert_eq!(cfg.provider, Provider::Anthropic);
    }

    #[test]
    fn validation_rejects_unusable_values() {
        let mut cfg = Config::default();
        assert!(cfg.validate().is_ok());
        cfg.rate_hz = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.min_confidence = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.cycle_deadline_s = -1.0;
        assert!(cfg.loop_config().is_err());
    }

    #[test]
    fn derived_runtime_configs_follow_fields() {
        let mut cfg = Config::default();
        cfg.reasoning_timeout_s = 4.5;
        cfg.require_frame = false;
        let orch = cfg.orchestrator_config().unwrap();
        assert_eq!(orch.reasoning_timeout, Duration::from_millis(4500));
        assert!(!orch.require_frame);
        assert_eq!(cfg.loop_config().unwrap().advisory_max_age, Duration::from_secs(30));
    }
}
