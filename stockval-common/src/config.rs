//! Configuration management for stockval.
//!
//! The tool reads a single YAML file (`conf.yaml`) describing the runtime
//! environment, data-source credentials, the Telegram notification target,
//! valuation model parameters and logging.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (see below)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # File Resolution
//!
//! 1. Path passed on the command line (`--config`)
//! 2. `STOCKVAL_CONFIG`
//! 3. `./conf.yaml`
//! 4. `~/.stockval/conf.yaml`
//!
//! # Environment Variable Mapping
//!
//! - `STOCKVAL_ENV_STATE` → env_state
//! - `FMP_API_KEY` → fmp.api_key
//! - `TELEGRAM_BOT_TOKEN` → telegram.bot_token
//! - `TELEGRAM_CHAT_ID` → telegram.chat_id
//! - `ALPHA_VANTAGE_API_KEY` → alpha_vantage.api_key
//! - `STOCKVAL_LOG_LEVEL` → logging.level

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::{Error, Result, ResultExt};
use crate::validation::{
    ensure_positive, ensure_present, ensure_range_f64, Validate, ValidationCollector,
    ValidationError, ValidationResult,
};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "conf.yaml";

/// Environment variable pointing at an explicit configuration file.
pub const CONFIG_ENV_VAR: &str = "STOCKVAL_CONFIG";

/// Get the per-user configuration directory (`~/.stockval`).
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".stockval"),
        |dirs| dirs.home_dir().join(".stockval"),
    )
}

/// Mask a secret for logging, keeping only a short prefix.
pub fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        return "<unset>".to_string();
    }
    let prefix: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{prefix}****")
    }
}

// ============================================================================
// Environment State
// ============================================================================

/// Deployment environment tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvironmentState {
    Development,
    #[default]
    Testing,
    Production,
}

impl EnvironmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Testing => "testing",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for EnvironmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvironmentState {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "testing" | "test" => Ok(Self::Testing),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ValidationError::invalid(
                "env_state",
                format!("unknown environment '{other}' (expected development, testing or production)"),
            )),
        }
    }
}

// ============================================================================
// Reporting Period
// ============================================================================

/// Financial statement granularity requested from FMP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportingPeriod {
    #[default]
    Annual,
    Quarter,
}

impl ReportingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Annual => "annual",
            Self::Quarter => "quarter",
        }
    }
}

impl fmt::Display for ReportingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportingPeriod {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "annual" => Ok(Self::Annual),
            "quarter" => Ok(Self::Quarter),
            other => Err(ValidationError::invalid(
                "fmp.period",
                format!("invalid reporting period '{other}' (valid values: annual, quarter)"),
            )),
        }
    }
}

// ============================================================================
// Log Level
// ============================================================================

/// Log verbosity, accepting both tracing and Python-style names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    /// Upper-case name used in configuration and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }

    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn filter_directive(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            // tracing has no level above ERROR
            Self::Error | Self::Critical => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Self::Trace),
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" | "FATAL" => Ok(Self::Critical),
            other => Err(ValidationError::invalid(
                "logging.level",
                format!("invalid log level '{other}'"),
            )),
        }
    }
}

// ============================================================================
// Log Rotation
// ============================================================================

/// How the log file is rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPolicy {
    /// Rotate when the file would grow past this many bytes
    Size(u64),
    Hourly,
    Daily,
    Never,
}

impl RotationPolicy {
    /// Parse a rotation string such as `"10 MB"`, `"512KiB"`, `"1048576"` or `"daily"`.
    pub fn parse(raw: &str) -> ValidationResult<Self> {
        let value = raw.trim();
        let lower = value.to_ascii_lowercase();
        match lower.as_str() {
            "hourly" => return Ok(Self::Hourly),
            "daily" => return Ok(Self::Daily),
            "never" | "none" => return Ok(Self::Never),
            _ => {}
        }

        let split_at = lower
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(lower.len());
        let (number, unit) = lower.split_at(split_at);
        let number: f64 = number.parse().map_err(|_| {
            ValidationError::invalid("logging.rotation", format!("cannot parse size '{value}'"))
        })?;

        let multiplier: u64 = match unit.trim() {
            "" | "b" | "bytes" => 1,
            "kb" | "k" => 1_000,
            "kib" => 1 << 10,
            "mb" | "m" => 1_000_000,
            "mib" => 1 << 20,
            "gb" | "g" => 1_000_000_000,
            "gib" => 1 << 30,
            other => {
                return Err(ValidationError::invalid(
                    "logging.rotation",
                    format!("unknown size unit '{other}'"),
                ))
            }
        };

        let bytes = (number * multiplier as f64).round();
        if !bytes.is_finite() || bytes < 1.0 {
            return Err(ValidationError::out_of_range(
                "logging.rotation",
                value,
                "a size of at least 1 byte",
            ));
        }
        Ok(Self::Size(bytes as u64))
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Financial Modeling Prep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FmpConfig {
    /// API access key
    #[serde(default)]
    pub api_key: String,

    /// Request timeout in seconds
    #[serde(default = "default_fmp_timeout", alias = "timeout_seconds")]
    pub timeout: u64,

    /// Financial statement period
    #[serde(
        default,
        serialize_with = "serialize_display",
        deserialize_with = "deserialize_from_str"
    )]
    pub period: ReportingPeriod,

    /// API root, overridable for testing
    #[serde(default = "default_fmp_base_url")]
    pub base_url: String,
}

fn default_fmp_timeout() -> u64 {
    15
}

fn default_fmp_base_url() -> String {
    "https://financialmodelingprep.com/api/v3".into()
}

impl Validate for FmpConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = ValidationCollector::new();
        errors.check(ensure_present("fmp.api_key", &self.api_key));
        errors.check(ensure_positive("fmp.timeout", self.timeout));
        errors.check(ensure_present("fmp.base_url", &self.base_url));
        errors.finish()
    }
}

/// Telegram notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token
    #[serde(default)]
    pub bot_token: String,

    /// Destination chat identifier (YAML integer or string)
    #[serde(default, deserialize_with = "deserialize_chat_id")]
    pub chat_id: String,

    /// Request timeout in seconds
    #[serde(default = "default_telegram_timeout", alias = "timeout_seconds")]
    pub timeout: u64,

    /// `parse_mode` sent with every message
    #[serde(default = "default_parse_mode")]
    pub parse_mode: String,

    /// Bot API root, overridable for testing
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,

    /// Send attempts per message
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

fn default_telegram_timeout() -> u64 {
    30
}

fn default_parse_mode() -> String {
    "Markdown".into()
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".into()
}

fn default_retry_count() -> u32 {
    3
}

impl Validate for TelegramConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = ValidationCollector::new();
        errors.check(ensure_present("telegram.bot_token", &self.bot_token));
        errors.check(ensure_present("telegram.chat_id", &self.chat_id));
        if self.timeout == 0 || self.timeout > 300 {
            errors.push(ValidationError::out_of_range(
                "telegram.timeout",
                self.timeout,
                "0 < value <= 300",
            ));
        }
        if self.retry_count == 0 {
            errors.push(ValidationError::out_of_range(
                "telegram.retry_count",
                self.retry_count,
                "value > 0",
            ));
        }
        errors.finish()
    }
}

/// Valuation model parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Monte Carlo iteration count
    #[serde(default = "default_monte_carlo_sims")]
    pub monte_carlo_sims: u64,

    /// Risk-free rate used to derive the discount rate
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,

    /// Percentile defining the reported valuation band (0.8 → 20th..80th)
    #[serde(default = "default_pe_percentile")]
    pub pe_percentile: f64,

    /// Years in the high-growth DCF stage
    #[serde(default = "default_dcf_growth_years")]
    pub dcf_growth_years: u32,

    /// Simulated price paths for the quarterly forecast
    #[serde(default = "default_forecast_paths")]
    pub forecast_paths: u32,

    /// Fixed RNG seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_monte_carlo_sims() -> u64 {
    10_000
}

fn default_risk_free_rate() -> f64 {
    0.02
}

fn default_pe_percentile() -> f64 {
    0.8
}

fn default_dcf_growth_years() -> u32 {
    5
}

fn default_forecast_paths() -> u32 {
    1_000
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            monte_carlo_sims: default_monte_carlo_sims(),
            risk_free_rate: default_risk_free_rate(),
            pe_percentile: default_pe_percentile(),
            dcf_growth_years: default_dcf_growth_years(),
            forecast_paths: default_forecast_paths(),
            seed: None,
        }
    }
}

impl Validate for ModelConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = ValidationCollector::new();
        errors.check(ensure_positive("model.monte_carlo_sims", self.monte_carlo_sims));
        errors.check(ensure_range_f64("model.risk_free_rate", self.risk_free_rate, 0.0, 1.0));
        errors.check(ensure_range_f64("model.pe_percentile", self.pe_percentile, 0.0, 1.0));
        errors.check(ensure_positive(
            "model.dcf_growth_years",
            u64::from(self.dcf_growth_years),
        ));
        errors.check(ensure_positive(
            "model.forecast_paths",
            u64::from(self.forecast_paths),
        ));
        errors.finish()
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base log level
    #[serde(
        default,
        serialize_with = "serialize_display",
        deserialize_with = "deserialize_from_str"
    )]
    pub level: LogLevel,

    /// Line template (`json`, `pretty`, `compact`, or a `%(name)s` style template)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log file destination; console only when unset
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Rotation threshold (`"10 MB"`, `"daily"`, ...)
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_format() -> String {
    "%(asctime)s - %(name)s - %(levelname)s - %(message)s".into()
}

fn default_rotation() -> String {
    "10 MB".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: default_log_format(),
            file_path: None,
            rotation: default_rotation(),
        }
    }
}

impl LoggingConfig {
    /// Parsed rotation policy.
    pub fn rotation_policy(&self) -> ValidationResult<RotationPolicy> {
        RotationPolicy::parse(&self.rotation)
    }

    /// Log file path with `~` and environment variables expanded.
    pub fn resolved_file_path(&self) -> Option<PathBuf> {
        self.file_path.as_ref().map(|p| {
            let raw = p.to_string_lossy();
            match shellexpand::full(&raw) {
                Ok(expanded) => PathBuf::from(expanded.as_ref()),
                Err(_) => PathBuf::from(shellexpand::tilde(&raw).as_ref()),
            }
        })
    }
}

impl Validate for LoggingConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = ValidationCollector::new();
        errors.check(ensure_present("logging.format", &self.format));
        errors.check(self.rotation_policy().map(|_| ()));
        errors.finish()
    }
}

/// Alpha Vantage quote provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlphaVantageConfig {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_fmp_timeout", alias = "timeout_seconds")]
    pub timeout: u64,

    #[serde(default = "default_alpha_vantage_base_url")]
    pub base_url: String,
}

fn default_alpha_vantage_base_url() -> String {
    "https://www.alphavantage.co/query".into()
}

impl Default for AlphaVantageConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            timeout: default_fmp_timeout(),
            base_url: default_alpha_vantage_base_url(),
        }
    }
}

impl Validate for AlphaVantageConfig {
    fn validate(&self) -> ValidationResult<()> {
        ensure_positive("alpha_vantage.timeout", self.timeout)
    }
}

/// Yahoo Finance quote provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YahooConfig {
    #[serde(default = "default_yahoo_timeout", alias = "timeout_seconds")]
    pub timeout: u64,

    #[serde(default = "default_yahoo_base_url")]
    pub base_url: String,
}

fn default_yahoo_timeout() -> u64 {
    10
}

fn default_yahoo_base_url() -> String {
    "https://query1.finance.yahoo.com".into()
}

impl Default for YahooConfig {
    fn default() -> Self {
        Self {
            timeout: default_yahoo_timeout(),
            base_url: default_yahoo_base_url(),
        }
    }
}

impl Validate for YahooConfig {
    fn validate(&self) -> ValidationResult<()> {
        ensure_positive("yahoo.timeout", self.timeout)
    }
}

/// Provider names accepted in `data_sources.priority`.
pub const KNOWN_PROVIDERS: &[&str] = &["fmp", "alpha_vantage", "yahoo"];

/// Data source routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourcesConfig {
    /// Providers in the order they are tried
    #[serde(default = "default_priority")]
    pub priority: Vec<String>,

    /// Retries per provider before failing over
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Result cache TTL in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_priority() -> Vec<String> {
    KNOWN_PROVIDERS.iter().map(|s| (*s).to_string()).collect()
}

fn default_max_retries() -> u32 {
    3
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for DataSourcesConfig {
    fn default() -> Self {
        Self {
            priority: default_priority(),
            max_retries: default_max_retries(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Validate for DataSourcesConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = ValidationCollector::new();
        if self.priority.is_empty() {
            errors.push(ValidationError::missing("data_sources.priority"));
        }
        for name in &self.priority {
            if !KNOWN_PROVIDERS.contains(&name.as_str()) {
                errors.push(ValidationError::invalid(
                    "data_sources.priority",
                    format!(
                        "unknown provider '{name}' (known: {})",
                        KNOWN_PROVIDERS.join(", ")
                    ),
                ));
            }
        }
        errors.finish()
    }
}

// ============================================================================
// Settings
// ============================================================================

static TELEGRAM_TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{9}:[\w-]{35}$").expect("valid regex"));
static FMP_KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9]{16,32}$").expect("valid regex"));

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Deployment environment
    #[serde(
        default,
        serialize_with = "serialize_display",
        deserialize_with = "deserialize_from_str"
    )]
    pub env_state: EnvironmentState,

    pub fmp: FmpConfig,

    pub telegram: TelegramConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub alpha_vantage: Option<AlphaVantageConfig>,

    #[serde(default)]
    pub yahoo: YahooConfig,

    #[serde(default)]
    pub data_sources: DataSourcesConfig,
}

impl Settings {
    /// Locate, load, override from the environment and validate the configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = resolve_config_path(path)?;
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config from {}", path.display()))?;

        let mut settings = Self::from_yaml_str(&content)
            .context(format!("Failed to parse config from {}", path.display()))?;

        settings.apply_env_overrides();
        settings
            .validate()
            .context(format!("Config {} failed validation", path.display()))?;

        Ok(settings)
    }

    /// Log where the configuration came from and its key model settings.
    ///
    /// Loading happens before the subscriber exists, so callers emit this once
    /// logging is initialised.
    pub fn log_summary(&self, path: &Path) {
        tracing::info!(
            path = %path.display(),
            env_state = %self.env_state,
            monte_carlo_sims = self.model.monte_carlo_sims,
            risk_free_rate = self.model.risk_free_rate,
            "Configuration loaded"
        );
    }

    /// Parse configuration from YAML text without validating it.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Err(Error::Config("configuration file is empty".into()));
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(state) = lookup("STOCKVAL_ENV_STATE") {
            match state.parse() {
                Ok(s) => self.env_state = s,
                Err(e) => tracing::warn!(error = %e, "Ignoring STOCKVAL_ENV_STATE"),
            }
        }
        if let Some(key) = lookup("FMP_API_KEY") {
            self.fmp.api_key = key;
        }
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(chat_id) = lookup("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = chat_id;
        }
        if let Some(key) = lookup("ALPHA_VANTAGE_API_KEY") {
            self.alpha_vantage
                .get_or_insert_with(AlphaVantageConfig::default)
                .api_key = key;
        }
        if let Some(level) = lookup("STOCKVAL_LOG_LEVEL") {
            match level.parse() {
                Ok(l) => self.logging.level = l,
                Err(e) => tracing::warn!(error = %e, "Ignoring STOCKVAL_LOG_LEVEL"),
            }
        }
    }

    /// Validate every section, reporting all problems at once.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = ValidationCollector::new();
        errors.check(self.fmp.validate());
        errors.check(self.telegram.validate());
        errors.check(self.model.validate());
        errors.check(self.logging.validate());
        if let Some(av) = &self.alpha_vantage {
            errors.check(av.validate());
        }
        errors.check(self.yahoo.validate());
        errors.check(self.data_sources.validate());
        errors.check(self.validate_production());
        errors.finish()
    }

    /// Stricter credential checks that only apply in production.
    pub fn validate_production(&self) -> ValidationResult<()> {
        if self.env_state != EnvironmentState::Production {
            return Ok(());
        }

        let mut errors = ValidationCollector::new();
        if !TELEGRAM_TOKEN_PATTERN.is_match(&self.telegram.bot_token) {
            errors.push(ValidationError::invalid(
                "telegram.bot_token",
                "production requires a valid Telegram bot token",
            ));
        }
        if !FMP_KEY_PATTERN.is_match(&self.fmp.api_key) {
            errors.push(ValidationError::invalid(
                "fmp.api_key",
                "FMP API key format is invalid",
            ));
        }
        errors.finish()
    }

    /// Level the subscriber should run at.
    pub fn effective_log_level(&self, verbose: bool) -> LogLevel {
        if verbose || self.env_state == EnvironmentState::Development {
            LogLevel::Debug
        } else {
            self.logging.level
        }
    }

    /// Alpha Vantage settings, when a key is configured.
    pub fn alpha_vantage_key(&self) -> Option<&str> {
        self.alpha_vantage
            .as_ref()
            .map(|av| av.api_key.as_str())
            .filter(|k| !k.is_empty())
    }
}

/// Find the configuration file to load.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return if path.exists() {
            Ok(path.to_path_buf())
        } else {
            Err(Error::NotFound(format!(
                "config file does not exist: {}",
                path.display()
            )))
        };
    }

    let mut candidates = Vec::new();
    if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
        candidates.push(PathBuf::from(env_path));
    }
    candidates.push(PathBuf::from(CONFIG_FILE_NAME));
    candidates.push(config_dir().join(CONFIG_FILE_NAME));

    candidates
        .iter()
        .find(|p| p.exists())
        .cloned()
        .ok_or_else(|| {
            let tried: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
            Error::NotFound(format!("config file not found (tried {})", tried.join(", ")))
        })
}

// ============================================================================
// Serde helpers
// ============================================================================

fn deserialize_from_str<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

fn serialize_display<S, T>(value: &T, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
    T: fmt::Display,
{
    serializer.collect_str(value)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChatIdRepr {
    Int(i64),
    Text(String),
}

fn deserialize_chat_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match ChatIdRepr::deserialize(deserializer)? {
        ChatIdRepr::Int(id) => id.to_string(),
        ChatIdRepr::Text(s) => s.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_case::test_case;

    const MINIMAL: &str = r#"
fmp:
  api_key: abcdefgh12345678
telegram:
  bot_token: "123456789:ABCDEFGHIJKLMNOPQRSTUVWXYZ012345678"
  chat_id: 987654321
"#;

    fn minimal() -> Settings {
        Settings::from_yaml_str(MINIMAL).unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let s = minimal();
        assert_eq!(s.env_state, EnvironmentState::Testing);
        assert_eq!(s.fmp.timeout, 15);
        assert_eq!(s.fmp.period, ReportingPeriod::Annual);
        assert_eq!(s.telegram.timeout, 30);
        assert_eq!(s.telegram.chat_id, "987654321");
        assert_eq!(s.telegram.parse_mode, "Markdown");
        assert_eq!(s.model.monte_carlo_sims, 10_000);
        assert!((s.model.risk_free_rate - 0.02).abs() < f64::EPSILON);
        assert!((s.model.pe_percentile - 0.8).abs() < f64::EPSILON);
        assert_eq!(s.model.dcf_growth_years, 5);
        assert_eq!(s.logging.level, LogLevel::Info);
        assert_eq!(s.logging.rotation, "10 MB");
        assert!(s.logging.file_path.is_none());
        assert_eq!(s.data_sources.priority, vec!["fmp", "alpha_vantage", "yahoo"]);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_period_is_case_insensitive() {
        let yaml = MINIMAL.replace("api_key: abcdefgh12345678", "api_key: k\n  period: QUARTER");
        let s = Settings::from_yaml_str(&yaml).unwrap();
        assert_eq!(s.fmp.period, ReportingPeriod::Quarter);
        assert_eq!(s.fmp.period.to_string(), "quarter");
    }

    #[test]
    fn test_invalid_period_rejected() {
        let yaml = MINIMAL.replace("api_key: abcdefgh12345678", "api_key: k\n  period: monthly");
        let err = Settings::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("monthly"));
    }

    #[test]
    fn test_timeout_seconds_alias() {
        let yaml = MINIMAL.replace("api_key: abcdefgh12345678", "api_key: k\n  timeout_seconds: 42");
        let s = Settings::from_yaml_str(&yaml).unwrap();
        assert_eq!(s.fmp.timeout, 42);
    }

    #[test]
    fn test_chat_id_string_or_int() {
        let yaml = MINIMAL.replace("chat_id: 987654321", "chat_id: \"-100123\"");
        let s = Settings::from_yaml_str(&yaml).unwrap();
        assert_eq!(s.telegram.chat_id, "-100123");
    }

    #[test_case("debug", LogLevel::Debug)]
    #[test_case("Warning", LogLevel::Warn)]
    #[test_case("CRITICAL", LogLevel::Critical)]
    #[test_case("info", LogLevel::Info)]
    fn test_log_level_parsing(raw: &str, expected: LogLevel) {
        assert_eq!(raw.parse::<LogLevel>().unwrap(), expected);
    }

    #[test]
    fn test_invalid_log_level() {
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test_case("10 MB", RotationPolicy::Size(10_000_000))]
    #[test_case("512KiB", RotationPolicy::Size(512 * 1024))]
    #[test_case("1.5 GB", RotationPolicy::Size(1_500_000_000))]
    #[test_case("2048", RotationPolicy::Size(2048))]
    #[test_case("daily", RotationPolicy::Daily)]
    #[test_case("Hourly", RotationPolicy::Hourly)]
    #[test_case("never", RotationPolicy::Never)]
    fn test_rotation_parsing(raw: &str, expected: RotationPolicy) {
        assert_eq!(RotationPolicy::parse(raw).unwrap(), expected);
    }

    #[test_case("ten MB")]
    #[test_case("10 parsecs")]
    #[test_case("0 MB")]
    fn test_rotation_rejects(raw: &str) {
        assert!(RotationPolicy::parse(raw).is_err());
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut s = minimal();
        s.fmp.api_key.clear();
        s.model.monte_carlo_sims = 0;
        s.model.pe_percentile = 1.5;
        s.telegram.timeout = 301;

        let errors = s.validate().unwrap_err().into_vec();
        let fields: Vec<_> = errors.iter().filter_map(|e| e.field()).collect();
        assert!(fields.contains(&"fmp.api_key"));
        assert!(fields.contains(&"model.monte_carlo_sims"));
        assert!(fields.contains(&"model.pe_percentile"));
        assert!(fields.contains(&"telegram.timeout"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut s = minimal();
        s.data_sources.priority = vec!["fmp".into(), "bloomberg".into()];
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("bloomberg"));
    }

    #[test]
    fn test_production_rules() {
        let mut s = minimal();
        s.env_state = EnvironmentState::Production;
        assert!(s.validate_production().is_ok());

        s.telegram.bot_token = "not-a-token".into();
        s.fmp.api_key = "short".into();
        let errors = s.validate_production().unwrap_err().into_vec();
        assert_eq!(errors.len(), 2);

        s.env_state = EnvironmentState::Testing;
        assert!(s.validate_production().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("STOCKVAL_ENV_STATE", "Development"),
            ("FMP_API_KEY", "from-env"),
            ("TELEGRAM_CHAT_ID", "42"),
            ("ALPHA_VANTAGE_API_KEY", "av-key"),
            ("STOCKVAL_LOG_LEVEL", "error"),
        ]
        .into_iter()
        .collect();

        let mut s = minimal();
        s.apply_overrides_from(|k| vars.get(k).map(|v| (*v).to_string()));

        assert_eq!(s.env_state, EnvironmentState::Development);
        assert_eq!(s.fmp.api_key, "from-env");
        assert_eq!(s.telegram.chat_id, "42");
        assert_eq!(s.alpha_vantage_key(), Some("av-key"));
        assert_eq!(s.logging.level, LogLevel::Error);
    }

    #[test]
    fn test_effective_log_level() {
        let mut s = minimal();
        assert_eq!(s.effective_log_level(false), LogLevel::Info);
        assert_eq!(s.effective_log_level(true), LogLevel::Debug);
        s.env_state = EnvironmentState::Development;
        assert_eq!(s.effective_log_level(false), LogLevel::Debug);
    }

    #[test]
    fn test_empty_file_rejected() {
        assert!(matches!(
            Settings::from_yaml_str("   \n"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_missing_explicit_path() {
        let err = resolve_config_path(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf.yaml");
        fs::write(&path, MINIMAL).unwrap();
        let s = Settings::load_from(&path).unwrap();
        assert_eq!(s.fmp.period, ReportingPeriod::Annual);
    }

    #[test]
    fn test_load_from_invalid_file_reports_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf.yaml");
        fs::write(&path, MINIMAL.replace("chat_id: 987654321", "chat_id: \"\"")).unwrap();
        let err = Settings::load_from(&path).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "<unset>");
        assert_eq!(mask_secret("abc"), "****");
        assert_eq!(mask_secret("abcdefgh"), "abcd****");
    }

    #[test]
    fn test_tilde_expanded_in_file_path() {
        let mut logging = LoggingConfig::default();
        logging.file_path = Some(PathBuf::from("~/logs/stockval.log"));
        let resolved = logging.resolved_file_path().unwrap();
        assert!(!resolved.to_string_lossy().starts_with('~'));
    }
}
