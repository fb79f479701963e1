use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use matchgate_core::config::{env_var_for, AppConfig, CONFIG_FILE_NAME, NESTED_CONFIG_FILE};
use toml::Value;

/// Aliases accepted next to the `MATCHGATE_<SECTION>_<KEY>` variable.
const ENV_ALIASES: &[(&str, &str)] =
    &[("logging.level", "MATCHGATE_LOG_LEVEL"), ("logging.format", "MATCHGATE_LOG_FORMAT")];

pub fn run(config: &AppConfig, explicit_path: Option<&Path>) -> String {
    let file_path = detect_config_path(explicit_path);
    let file_doc = load_config_file_doc(file_path.as_deref());
    let source = |key_path: &str, env_overridable: bool| {
        field_source(key_path, env_overridable, file_doc.as_ref(), file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_owned()];
    for (key_path, value) in scalar_values(config) {
        lines.push(render_line(key_path, &value, source(key_path, true)));
    }
    for (key, profile) in &config.tolerance {
        let key_path = format!("tolerance.{key}");
        let value = format!(
            "price={}% quantity={}% amount={} auto_limit={}",
            profile.price_tolerance_pct,
            profile.quantity_tolerance_pct,
            profile.amount_tolerance_abs,
            profile.auto_approval_limit
        );
        lines.push(render_line(&key_path, &value, source(&key_path, false)));
    }
    for (tier, thresholds) in &config.tiers {
        let key_path = format!("tiers.{tier}");
        let value = format!(
            "manager={} director={} executive={}",
            thresholds.manager, thresholds.director, thresholds.executive
        );
        lines.push(render_line(&key_path, &value, source(&key_path, false)));
    }

    lines.join("\n")
}

fn scalar_values(config: &AppConfig) -> Vec<(&'static str, String)> {
    let matching = &config.matching;
    let workflow = &config.workflow;
    vec![
        (
            "matching.default_profile",
            matching.default_profile.clone().unwrap_or_else(|| "<builtin: basic>".into()),
        ),
        ("matching.po_search_window_pct", matching.po_search_window_pct.to_string()),
        ("matching.min_line_score", matching.min_line_score.to_string()),
        ("workflow.fraud_override_threshold", workflow.fraud_override_threshold.to_string()),
        ("workflow.default_timeout_hours", workflow.default_timeout_hours.to_string()),
        ("workflow.cfo_timeout_hours", workflow.cfo_timeout_hours.to_string()),
        ("workflow.escalation_timeout_hours", workflow.escalation_timeout_hours.to_string()),
        ("workflow.preparer_review", workflow.preparer_review.to_string()),
        ("workflow.auto_escalate_on_timeout", workflow.auto_escalate_on_timeout.to_string()),
        ("workflow.timeout_clock", workflow.timeout_clock.as_str().to_owned()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format).to_ascii_lowercase()),
    ]
}

fn detect_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    match explicit_path {
        Some(path) => path.is_file().then(|| path.to_path_buf()),
        None => [CONFIG_FILE_NAME, NESTED_CONFIG_FILE]
            .into_iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.is_file()),
    }
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_overridable: bool,
    file_doc: Option<&Value>,
    file_path: Option<&Path>,
) -> String {
    if env_overridable {
        let aliases = ENV_ALIASES.iter().filter(|(key, _)| *key == key_path).map(|(_, var)| *var);
        let set_var = std::iter::once(env_var_for(key_path))
            .chain(aliases.map(str::to_owned))
            .find(|var| env::var(var).is_ok_and(|value| !value.trim().is_empty()));
        if let Some(var) = set_var {
            return format!("env ({var})");
        }
    }

    match (file_doc, file_path) {
        (Some(doc), Some(path)) if contains_path(doc, key_path) => {
            format!("file ({})", path.display())
        }
        _ => "default".to_owned(),
    }
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    key_path.split('.').try_fold(root, |table, key| table.get(key)).is_some()
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
