use std::path::Path;

use chrono::Utc;
use matchgate_core::config::AppConfig;
use matchgate_core::ports::FixedRiskScore;
use matchgate_core::{
    plan_workflow, ApplicationError, AuditCategory, AuditEvent, AuditOutcome, AuditSink,
    MatchResult, PlanningInput, RiskScoreProvider, TracingAuditSink, WorkflowInstance,
};
use serde::Serialize;

use super::bundle::DocumentBundle;
use super::matching::{application_failure, cli_audit_context, match_bundle};
use super::CommandResult;

const COMMAND: &str = "plan";

#[derive(Clone, Debug)]
pub struct PlanArgs {
    pub tier: String,
    pub risk: f64,
    pub profile: Option<String>,
    pub three_way: bool,
}

#[derive(Serialize)]
struct PlanBody<'a> {
    tier: &'a str,
    match_result: &'a MatchResult,
    workflow: &'a WorkflowInstance,
}

pub fn run(config: &AppConfig, bundle: &Path, args: PlanArgs) -> CommandResult {
    if !(0.0..=1.0).contains(&args.risk) {
        return CommandResult::failure(
            COMMAND,
            "invalid_input",
            format!("risk score {} is outside [0, 1]", args.risk),
            2,
        );
    }

    let bundle = match DocumentBundle::load(bundle) {
        Ok(bundle) => bundle,
        Err(error) => {
            return CommandResult::failure(COMMAND, "invalid_input", format!("{error:#}"), 2)
        }
    };

    match plan_bundle(config, &bundle, &args) {
        Ok((match_result, workflow)) => CommandResult::with_body(
            COMMAND,
            &PlanBody { tier: &args.tier, match_result: &match_result, workflow: &workflow },
        ),
        Err(error) => application_failure(COMMAND, &error),
    }
}

fn plan_bundle(
    config: &AppConfig,
    bundle: &DocumentBundle,
    args: &PlanArgs,
) -> Result<(MatchResult, WorkflowInstance), ApplicationError> {
    let thresholds = config.threshold_registry().resolve(&args.tier)?;
    let profile_key = bundle.profile_key(args.profile.as_deref());
    let match_result = match_bundle(config, bundle, profile_key, args.three_way)?;
    let risk_score = FixedRiskScore(args.risk).risk_score(&bundle.invoice)?;

    let company_id = bundle.company_id.clone().unwrap_or_else(|| args.tier.clone());
    let workflow = plan_workflow(
        PlanningInput {
            invoice_id: bundle.invoice.id.clone(),
            company_id,
            invoice_amount: bundle.invoice.total_amount,
            thresholds: &thresholds,
            match_result: &match_result,
            risk_score,
            created_at: Utc::now(),
        },
        &config.workflow_policy(),
    );

    let audit = cli_audit_context(bundle).with_workflow(workflow.workflow_id.clone());
    TracingAuditSink.emit(
        AuditEvent::new(&audit, "workflow.planned", AuditCategory::Workflow, AuditOutcome::Success)
            .with_metadata("tier", args.tier.as_str())
            .with_metadata("steps", workflow.steps.len().to_string())
            .with_metadata("auto_approved", workflow.is_auto_approved().to_string()),
    );
    tracing::info!(
        event_name = "cli.plan.completed",
        workflow_id = %workflow.workflow_id,
        status = ?workflow.status,
        steps = workflow.steps.len(),
        "plan command finished"
    );
    Ok((match_result, workflow))
}
