//! Workflows: a small sequential step engine and the plan generation
//! workflow built on it.

pub mod engine;
pub mod plan_generation;

pub use engine::{
    StepError, StepState, StepStatus, Workflow, WorkflowContext, WorkflowEngine, WorkflowHandle,
    WorkflowState, WorkflowStatus, WorkflowStep, INPUT_KEY,
};
pub use plan_generation::{
    suggest_example_urls, GeneratedPlan, LoadedPages, PersistedPlan, PlanGenerationRequest,
    PlanGenerator, WORKFLOW_NAME,
};
