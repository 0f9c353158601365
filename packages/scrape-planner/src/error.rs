//! Typed errors for the scrape planner.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can match
//! on the failure they care about. Resolution errors (`CompletionError`)
//! never leave the resolvers; they are demoted to the next fallback tier.

use thiserror::Error;

/// Top-level error for planner operations.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// Completion service failed outside a resolver (e.g. adapter setup)
    #[error("completion error: {0}")]
    Completion(#[from] CompletionError),

    /// Key-value store failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Plan lifecycle rule violated
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Workflow step failed or workflow unknown
    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// Invalid cron schedule
    #[error("schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// Page could not be provided by the DOM provider
    #[error("page unavailable: {url}: {reason}")]
    PageUnavailable { url: String, reason: String },

    /// Invalid URL format
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

/// Errors from the completion-service adapter.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// The call did not finish within the configured timeout
    #[error("completion timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Transport failure talking to the service
    #[error("HTTP error: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Service answered with something other than a completion
    #[error("invalid completion response: {0}")]
    InvalidResponse(String),

    /// Service not configured or unreachable
    #[error("completion service unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the durable key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend failure (connection, poisoned lock, ...)
    #[error("backend error: {0}")]
    Backend(String),

    /// Stored value could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from plan lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// No status record for the plan
    #[error("plan not found: {plan_id}")]
    PlanNotFound { plan_id: String },

    /// Plan exists but not at that version
    #[error("plan {plan_id} has no version {version}")]
    VersionNotFound { plan_id: String, version: u32 },

    /// Transition not allowed by the lifecycle
    #[error("invalid transition for plan {plan_id}: {from} -> {to}")]
    InvalidTransition {
        plan_id: String,
        from: String,
        to: String,
    },

    /// Caller acted on a stale version
    #[error("version conflict for plan {plan_id}: expected {expected}, current {actual}")]
    VersionConflict {
        plan_id: String,
        expected: u32,
        actual: u32,
    },

    /// Concurrent writers kept winning the compare-and-swap
    #[error("concurrent update to plan {plan_id} did not settle after {attempts} attempts")]
    Contention { plan_id: String, attempts: u32 },

    /// Plan already exists under this id
    #[error("plan already exists: {plan_id}")]
    AlreadyExists { plan_id: String },

    /// Modification does not change the plan
    #[error("modification of plan {plan_id} changes nothing")]
    NoChanges { plan_id: String },

    /// Execution record not found
    #[error("execution not found: {run_id}")]
    ExecutionNotFound { run_id: String },

    /// Plan carries an invalid schedule
    #[error("invalid schedule: {0}")]
    Schedule(#[from] ScheduleError),

    /// Store failed underneath the lifecycle
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from the workflow engine.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A step returned an error; the workflow halted
    #[error("step '{step_id}' failed: {message}")]
    StepFailed { step_id: String, message: String },

    /// Workflow id unknown (never started or already purged)
    #[error("workflow not found: {workflow_id}")]
    NotFound { workflow_id: String },

    /// A step read a context key an earlier step should have produced
    #[error("missing context value: {key}")]
    MissingContext { key: String },

    /// A context value did not have the shape the step expected
    #[error("invalid context value '{key}': {message}")]
    InvalidContext { key: String, message: String },

    /// Pause/resume requested for a workflow that already finished
    #[error("workflow {workflow_id} is already finished")]
    AlreadyFinished { workflow_id: String },

    /// The workflow task itself panicked or was aborted
    #[error("workflow task aborted: {0}")]
    Aborted(String),
}

/// Errors from cron schedule handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    /// Wrong number of fields
    #[error("expected 5 or 6 fields, got {count}: '{expression}'")]
    FieldCount { expression: String, count: usize },

    /// A field is out of range or malformed
    #[error("invalid {field} field '{value}' in '{expression}'")]
    InvalidField {
        expression: String,
        field: &'static str,
        value: String,
    },
}

/// Result type alias for planner operations.
pub type Result<T> = std::result::Result<T, PlannerError>;

/// Result type alias for completion calls.
pub type CompletionResult<T> = std::result::Result<T, CompletionError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for lifecycle operations.
pub type LifecycleResult<T> = std::result::Result<T, LifecycleError>;

/// Result type alias for workflow operations.
pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;
