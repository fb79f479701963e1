use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matching::MatchSettings;
use crate::thresholds::{ApprovalThresholds, ThresholdRegistry};
use crate::tolerance::{ToleranceProfile, ToleranceRegistry};
use crate::workflow::{TimeoutClock, WorkflowPolicy};

pub const CONFIG_FILE_NAME: &str = "matchgate.toml";
pub const NESTED_CONFIG_FILE: &str = "config/matchgate.toml";

#[derive(Clone, Debug, Serialize)]
pub struct AppConfig {
    pub matching: MatchingConfig,
    pub workflow: WorkflowPolicy,
    pub logging: LoggingConfig,
    /// Extra or replacement tolerance profiles keyed by ERP or company id.
    pub tolerance: BTreeMap<String, ToleranceProfile>,
    /// Extra or replacement approval thresholds keyed by tier.
    pub tiers: BTreeMap<String, ApprovalThresholds>,
}

#[derive(Clone, Debug, Serialize)]
pub struct MatchingConfig {
    pub default_profile: Option<String>,
    pub po_search_window_pct: Decimal,
    pub min_line_score: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub default_profile: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub preparer_review: Option<bool>,
    pub auto_escalate_on_timeout: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "MATCHGATE";

const LOG_LEVEL_ALIAS: &str = "MATCHGATE_LOG_LEVEL";
const LOG_FORMAT_ALIAS: &str = "MATCHGATE_LOG_FORMAT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("`{path}` is not valid matchgate TOML: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("config file `{0}` was requested but does not exist")]
    MissingConfigFile(PathBuf),
    #[error("`${{{var}}}` is referenced in the config file but `{var}` is not set")]
    MissingEnvInterpolation { var: String },
    #[error("`${{` in the config file is never closed with `}}`")]
    UnterminatedInterpolation,
    #[error("`{key}={value}` cannot be parsed")]
    InvalidEnvOverride { key: String, value: String },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        let settings = MatchSettings::default();
        Self {
            matching: MatchingConfig {
                default_profile: None,
                po_search_window_pct: settings.po_search_window_pct,
                min_line_score: settings.min_line_score,
            },
            workflow: WorkflowPolicy::default(),
            logging: LoggingConfig { level: "info".to_owned(), format: LogFormat::Compact },
            tolerance: BTreeMap::new(),
            tiers: BTreeMap::new(),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let format = match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            "json" => Self::Json,
            _ => {
                return Err(ConfigError::Validation(format!(
                    "logging.format `{}` is not one of compact, pretty, json",
                    value.trim()
                )))
            }
        };
        Ok(format)
    }
}

/// Maps a dotted key such as `workflow.cfo_timeout_hours` to the variable that
/// overrides it, `MATCHGATE_WORKFLOW_CFO_TIMEOUT_HOURS`.
pub fn env_var_for(key_path: &str) -> String {
    format!("{ENV_PREFIX}_{}", key_path.replace('.', "_").to_ascii_uppercase())
}

impl AppConfig {
    /// Defaults, then the config file, then `MATCHGATE_*` variables, then
    /// explicit overrides. The result is validated before it is returned.
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        Self::load_with_env(options, |var| env::var(var).ok())
    }

    fn load_with_env<F>(options: LoadOptions, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvLayer { lookup };
        let mut config = Self::default();

        match locate_config_file(options.config_path.as_deref()) {
            Some(path) => config.merge_file(read_patch(&path, &env)?),
            None if options.require_file => {
                return Err(ConfigError::MissingConfigFile(
                    options.config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME)),
                ));
            }
            None => {}
        }

        config.merge_env(&env)?;
        config.merge_overrides(options.overrides);
        config.validate()?;
        Ok(config)
    }

    /// Built-in ERP profiles with configured entries layered on top.
    pub fn tolerance_registry(&self) -> ToleranceRegistry {
        let mut registry = ToleranceRegistry::builtin();
        for (key, profile) in &self.tolerance {
            registry.insert(key, profile.clone());
        }
        if let Some(default_profile) = &self.matching.default_profile {
            registry.set_default_key(Some(default_profile.clone()));
        }
        registry
    }

    pub fn threshold_registry(&self) -> ThresholdRegistry {
        let mut registry = ThresholdRegistry::builtin();
        for (tier, thresholds) in &self.tiers {
            registry.insert(tier, thresholds.clone());
        }
        registry
    }

    pub fn match_settings(&self) -> MatchSettings {
        MatchSettings {
            po_search_window_pct: self.matching.po_search_window_pct,
            min_line_score: self.matching.min_line_score,
        }
    }

    pub fn workflow_policy(&self) -> WorkflowPolicy {
        self.workflow.clone()
    }

    fn merge_file(&mut self, patch: ConfigPatch) {
        let matching = patch.matching.unwrap_or_default();
        if matching.default_profile.is_some() {
            self.matching.default_profile = matching.default_profile;
        }
        replace(&mut self.matching.po_search_window_pct, matching.po_search_window_pct);
        replace(&mut self.matching.min_line_score, matching.min_line_score);

        let workflow = patch.workflow.unwrap_or_default();
        let policy = &mut self.workflow;
        replace(&mut policy.fraud_override_threshold, workflow.fraud_override_threshold);
        replace(&mut policy.default_timeout_hours, workflow.default_timeout_hours);
        replace(&mut policy.cfo_timeout_hours, workflow.cfo_timeout_hours);
        replace(&mut policy.escalation_timeout_hours, workflow.escalation_timeout_hours);
        replace(&mut policy.preparer_review, workflow.preparer_review);
        replace(&mut policy.auto_escalate_on_timeout, workflow.auto_escalate_on_timeout);
        replace(&mut policy.timeout_clock, workflow.timeout_clock);

        let logging = patch.logging.unwrap_or_default();
        replace(&mut self.logging.level, logging.level);
        replace(&mut self.logging.format, logging.format);

        self.tolerance.extend(patch.tolerance);
        self.tiers.extend(patch.tiers);
    }

    fn merge_env<F>(&mut self, env: &EnvLayer<F>) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(profile) = env.value(&env_var_for("matching.default_profile")) {
            self.matching.default_profile = Some(profile);
        }
        env.parse_into("matching.po_search_window_pct", &mut self.matching.po_search_window_pct)?;
        env.parse_into("matching.min_line_score", &mut self.matching.min_line_score)?;

        let policy = &mut self.workflow;
        env.parse_into("workflow.fraud_override_threshold", &mut policy.fraud_override_threshold)?;
        env.parse_into("workflow.default_timeout_hours", &mut policy.default_timeout_hours)?;
        env.parse_into("workflow.cfo_timeout_hours", &mut policy.cfo_timeout_hours)?;
        env.parse_into("workflow.escalation_timeout_hours", &mut policy.escalation_timeout_hours)?;
        env.parse_into("workflow.preparer_review", &mut policy.preparer_review)?;
        env.parse_into("workflow.auto_escalate_on_timeout", &mut policy.auto_escalate_on_timeout)?;
        env.parse_into("workflow.timeout_clock", &mut policy.timeout_clock)?;

        let level = env
            .value(&env_var_for("logging.level"))
            .or_else(|| env.value(LOG_LEVEL_ALIAS));
        replace(&mut self.logging.level, level);
        let format = env
            .value(&env_var_for("logging.format"))
            .or_else(|| env.value(LOG_FORMAT_ALIAS));
        if let Some(format) = format {
            self.logging.format = format.parse()?;
        }
        Ok(())
    }

    fn merge_overrides(&mut self, overrides: ConfigOverrides) {
        if overrides.default_profile.is_some() {
            self.matching.default_profile = overrides.default_profile;
        }
        replace(&mut self.logging.level, overrides.log_level);
        replace(&mut self.logging.format, overrides.log_format);
        replace(&mut self.workflow.preparer_review, overrides.preparer_review);
        replace(&mut self.workflow.auto_escalate_on_timeout, overrides.auto_escalate_on_timeout);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let window = self.matching.po_search_window_pct;
        if window <= Decimal::ZERO || window > Decimal::ONE_HUNDRED {
            return invalid(format!("matching.po_search_window_pct {window} is outside (0, 100]"));
        }
        if !(0.0..1.0).contains(&self.matching.min_line_score) {
            return invalid(format!(
                "matching.min_line_score {} is outside [0, 1)",
                self.matching.min_line_score
            ));
        }
        self.workflow.validate().or_else(|message| invalid(format!("workflow: {message}")))?;

        let level = self.logging.level.trim().to_ascii_lowercase();
        if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
            return invalid(format!(
                "logging.level `{}` is not one of trace, debug, info, warn, error",
                self.logging.level
            ));
        }

        for (key, profile) in &self.tolerance {
            profile.validate().or_else(|message| invalid(format!("tolerance.{key}: {message}")))?;
        }
        for (tier, thresholds) in &self.tiers {
            thresholds.validate().or_else(|message| invalid(format!("tiers.{tier}: {message}")))?;
        }

        match &self.matching.default_profile {
            Some(key) if !self.tolerance_registry().contains(key) => invalid(format!(
                "matching.default_profile `{key}` is neither built in nor configured \
                 under [tolerance]"
            )),
            _ => Ok(()),
        }
    }
}

fn replace<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn invalid<T>(message: String) -> Result<T, ConfigError> {
    Err(ConfigError::Validation(message))
}

/// Variable lookup used for overrides and `${VAR}` interpolation.
struct EnvLayer<F> {
    lookup: F,
}

impl<F> EnvLayer<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
    }

    /// Blank values count as unset.
    fn value(&self, var: &str) -> Option<String> {
        self.raw(var).filter(|value| !value.trim().is_empty())
    }

    fn parse_into<T>(&self, key_path: &str, slot: &mut T) -> Result<(), ConfigError>
    where
        T: std::str::FromStr,
    {
        let var = env_var_for(key_path);
        let Some(value) = self.value(&var) else {
            return Ok(());
        };
        *slot = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnvOverride { key: var, value })?;
        Ok(())
    }
}

fn locate_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => path.is_file().then(|| path.to_path_buf()),
        None => [CONFIG_FILE_NAME, NESTED_CONFIG_FILE]
            .into_iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.is_file()),
    }
}

fn read_patch<F>(path: &Path, env: &EnvLayer<F>) -> Result<ConfigPatch, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    let expanded = expand_placeholders(&raw, env)?;
    toml::from_str(&expanded)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Replaces every `${VAR}` with the variable's value; an unset variable is an error.
fn expand_placeholders<F>(raw: &str, env: &EnvLayer<F>) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut expanded = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(open) = rest.find("${") {
        expanded.push_str(&rest[..open]);
        let tail = &rest[open + 2..];
        let close = tail.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let var = &tail[..close];
        let value = env
            .raw(var)
            .ok_or_else(|| ConfigError::MissingEnvInterpolation { var: var.to_owned() })?;
        expanded.push_str(&value);
        rest = &tail[close + 1..];
    }
    expanded.push_str(rest);
    Ok(expanded)
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    matching: Option<MatchingPatch>,
    workflow: Option<WorkflowPatch>,
    logging: Option<LoggingPatch>,
    #[serde(default)]
    tolerance: BTreeMap<String, ToleranceProfile>,
    #[serde(default)]
    tiers: BTreeMap<String, ApprovalThresholds>,
}

#[derive(Debug, Default, Deserialize)]
struct MatchingPatch {
    default_profile: Option<String>,
    po_search_window_pct: Option<Decimal>,
    min_line_score: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    fraud_override_threshold: Option<f64>,
    default_timeout_hours: Option<u32>,
    cfo_timeout_hours: Option<u32>,
    escalation_timeout_hours: Option<u32>,
    preparer_review: Option<bool>,
    auto_escalate_on_timeout: Option<bool>,
    timeout_clock: Option<TimeoutClock>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
