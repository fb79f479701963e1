use std::path::Path;

use matchgate_core::config::AppConfig;
use matchgate_core::{
    ApplicationError, AuditContext, MatchEngine, MatchResult, MatchType, TracingAuditSink,
};
use serde::Serialize;
use uuid::Uuid;

use super::bundle::DocumentBundle;
use super::CommandResult;

const COMMAND: &str = "match";
const CLI_ACTOR: &str = "matchgate-cli";

#[derive(Serialize)]
struct MatchBody<'a> {
    profile: &'a str,
    result: &'a MatchResult,
}

pub fn run(
    config: &AppConfig,
    bundle: &Path,
    profile: Option<&str>,
    three_way: bool,
) -> CommandResult {
    let bundle = match DocumentBundle::load(bundle) {
        Ok(bundle) => bundle,
        Err(error) => {
            return CommandResult::failure(COMMAND, "invalid_input", format!("{error:#}"), 2)
        }
    };

    let profile_key = bundle.profile_key(profile).to_owned();
    match match_bundle(config, &bundle, &profile_key, three_way) {
        Ok(result) => CommandResult::with_body(
            COMMAND,
            &MatchBody { profile: &profile_key, result: &result },
        ),
        Err(error) => application_failure(COMMAND, &error),
    }
}

pub(crate) fn match_bundle(
    config: &AppConfig,
    bundle: &DocumentBundle,
    profile_key: &str,
    three_way: bool,
) -> Result<MatchResult, ApplicationError> {
    let tolerance = config.tolerance_registry().resolve(profile_key)?;
    let match_type = if three_way { MatchType::ThreeWay } else { MatchType::TwoWay };
    let engine = MatchEngine::new(bundle.store(), config.match_settings());

    let audit = cli_audit_context(bundle);
    let result =
        engine.run_with_audit(&bundle.invoice, &tolerance, match_type, &TracingAuditSink, &audit)?;
    tracing::info!(
        event_name = "cli.match.completed",
        invoice_id = %result.invoice_id,
        status = result.status.as_str(),
        confidence = result.confidence_score,
        "match command finished"
    );
    Ok(result)
}

pub(crate) fn cli_audit_context(bundle: &DocumentBundle) -> AuditContext {
    AuditContext::for_invoice(bundle.invoice.id.clone(), Uuid::new_v4().to_string(), CLI_ACTOR)
}

/// Configuration problems are the operator's to fix (exit 2); collaborator and
/// workflow failures exit 3.
pub(crate) fn application_failure(command: &str, error: &ApplicationError) -> CommandResult {
    let exit_code = match error {
        ApplicationError::ConfigurationMissing { .. } | ApplicationError::Configuration(_) => 2,
        ApplicationError::Lookup(_) | ApplicationError::Domain(_) => 3,
    };
    tracing::warn!(
        event_name = "cli.command.failed",
        command,
        error_class = error.error_class(),
        error = %error,
        "command failed"
    );
    CommandResult::failure(command, error.error_class(), error.to_string(), exit_code)
}
