pub mod engine;
pub mod planner;
pub mod registry;

pub use engine::{
    apply_action, check_timeout, ActionOutcome, ActionRequest, TimeoutCheck, TimeoutResolution,
    WorkflowAction, WorkflowEngine,
};
pub use planner::{
    plan_steps, plan_workflow, PlanningInput, StepPlan, TimeoutClock, WorkflowPolicy,
};
pub use registry::WorkflowRegistry;
