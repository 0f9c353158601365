//! Sequential step engine.
//!
//! Each workflow instance runs as its own tokio task. Steps run strictly in
//! order; each step's JSON output is merged into the shared context under
//! the step id before the next step starts. A failing step halts the
//! workflow: the step is marked `failed`, the rest `skipped`, and the error
//! is returned to the caller after the state is recorded.
//!
//! Workflow records live in memory only and are discarded once the
//! retention window after completion has passed.
//!
//! Pause/resume is cooperative: it takes effect between steps, never inside one.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::Clock;
use crate::error::{WorkflowError, WorkflowResult};

/// Context key holding the workflow input.
pub const INPUT_KEY: &str = "input";

/// Error type returned by step bodies.
pub type StepError = Box<dyn std::error::Error + Send + Sync>;

/// One unit of work in a workflow.
#[async_trait]
pub trait WorkflowStep: Send + Sync {
    /// Unique id within the workflow; also the context key of the output.
    fn id(&self) -> &'static str;

    /// Produce this step's output from the context built so far.
    async fn run(&self, ctx: &WorkflowContext) -> Result<Value, StepError>;
}

/// Shared JSON context: the input plus every completed step's output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    values: Map<String, Value>,
}

impl WorkflowContext {
    pub fn new(input: Value) -> Self {
        let mut values = Map::new();
        values.insert(INPUT_KEY.to_string(), input);
        Self { values }
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Deserialize the value stored under `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> WorkflowResult<T> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| WorkflowError::MissingContext {
                key: key.to_string(),
            })?;
        serde_json::from_value(value.clone()).map_err(|e| WorkflowError::InvalidContext {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    /// Deserialize the workflow input.
    pub fn input<T: DeserializeOwned>(&self) -> WorkflowResult<T> {
        self.get(INPUT_KEY)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }
}

/// Per-step record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Inspectable record of one workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub name: String,
    pub status: WorkflowStatus,
    pub steps: Vec<StepState>,
    pub context: WorkflowContext,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Set by `pause`, honored before the next step
    #[serde(default)]
    pub pause_requested: bool,
}

impl WorkflowState {
    pub fn step(&self, step_id: &str) -> Option<&StepState> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }
}

/// A named, ordered list of steps.
#[derive(Clone)]
pub struct Workflow {
    name: String,
    steps: Vec<Arc<dyn WorkflowStep>>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: impl WorkflowStep + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_ids(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.id()).collect()
    }
}

struct EngineInner {
    workflows: RwLock<HashMap<String, WorkflowState>>,
    resume_signals: RwLock<HashMap<String, Arc<Notify>>>,
    clock: Arc<dyn Clock>,
    retention: ChronoDuration,
}

/// Runs workflows and keeps their records for the retention window.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

/// Handle to a started workflow.
pub struct WorkflowHandle {
    pub workflow_id: String,
    engine: WorkflowEngine,
    task: JoinHandle<WorkflowResult<WorkflowContext>>,
}

impl WorkflowHandle {
    /// Wait for the workflow to finish.
    pub async fn wait(self) -> WorkflowResult<WorkflowContext> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                let message = e.to_string();
                error!(workflow_id = %self.workflow_id, error = %message, "Workflow task aborted");
                self.engine.mark_aborted(&self.workflow_id, &message);
                Err(WorkflowError::Aborted(message))
            }
        }
    }
}

impl WorkflowEngine {
    pub fn new(clock: Arc<dyn Clock>, retention: Duration) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                workflows: RwLock::new(HashMap::new()),
                resume_signals: RwLock::new(HashMap::new()),
                clock,
                retention: ChronoDuration::from_std(retention).unwrap_or(ChronoDuration::MAX),
            }),
        }
    }

    /// Spawn a workflow; returns once its record exists.
    pub fn start(&self, workflow: Workflow, input: Value) -> WorkflowHandle {
        self.purge_expired();

        let workflow_id = Uuid::now_v7().to_string();
        let ctx = WorkflowContext::new(input);
        let state = WorkflowState {
            workflow_id: workflow_id.clone(),
            name: workflow.name.clone(),
            status: WorkflowStatus::Running,
            steps: workflow
                .steps
                .iter()
                .map(|s| StepState {
                    step_id: s.id().to_string(),
                    status: StepStatus::Pending,
                    started_at: None,
                    finished_at: None,
                    error: None,
                })
                .collect(),
            context: ctx.clone(),
            error: None,
            started_at: self.inner.clock.now(),
            finished_at: None,
            pause_requested: false,
        };

        if let Ok(mut workflows) = self.inner.workflows.write() {
            workflows.insert(workflow_id.clone(), state);
        }
        if let Ok(mut signals) = self.inner.resume_signals.write() {
            signals.insert(workflow_id.clone(), Arc::new(Notify::new()));
        }

        info!(workflow_id = %workflow_id, workflow = %workflow.name, "Workflow started");

        let engine = self.clone();
        let id = workflow_id.clone();
        let task = tokio::spawn(async move { engine.drive(&id, workflow, ctx).await });

        WorkflowHandle {
            workflow_id,
            engine: self.clone(),
            task,
        }
    }

    /// Start a workflow and wait for it.
    pub async fn run(&self, workflow: Workflow, input: Value) -> WorkflowResult<WorkflowContext> {
        self.start(workflow, input).wait().await
    }

    /// Current record, if still retained.
    pub fn state(&self, workflow_id: &str) -> Option<WorkflowState> {
        self.purge_expired();
        self.inner
            .workflows
            .read()
            .ok()?
            .get(workflow_id)
            .cloned()
    }

    /// Ask the workflow to pause before its next step.
    pub fn pause(&self, workflow_id: &str) -> WorkflowResult<()> {
        self.update(workflow_id, |state| {
            if state.status.is_finished() {
                return Err(WorkflowError::AlreadyFinished {
                    workflow_id: state.workflow_id.clone(),
                });
            }
            state.pause_requested = true;
            Ok(())
        })?;
        info!(workflow_id = %workflow_id, "Workflow pause requested");
        Ok(())
    }

    /// Let a paused workflow continue.
    pub fn resume(&self, workflow_id: &str) -> WorkflowResult<()> {
        self.update(workflow_id, |state| {
            if state.status.is_finished() {
                return Err(WorkflowError::AlreadyFinished {
                    workflow_id: state.workflow_id.clone(),
                });
            }
            state.pause_requested = false;
            if state.status == WorkflowStatus::Paused {
                state.status = WorkflowStatus::Running;
            }
            Ok(())
        })?;
        if let Some(signal) = self.signal(workflow_id) {
            signal.notify_one();
        }
        info!(workflow_id = %workflow_id, "Workflow resumed");
        Ok(())
    }

    /// Drop finished records older than the retention window.
    pub fn purge_expired(&self) -> usize {
        let now = self.inner.clock.now();
        let retention = self.inner.retention;
        let Ok(mut workflows) = self.inner.workflows.write() else {
            return 0;
        };
        let expired: Vec<String> = workflows
            .values()
            .filter(|w| {
                w.finished_at
                    .map(|at| now.signed_duration_since(at) >= retention)
                    .unwrap_or(false)
            })
            .map(|w| w.workflow_id.clone())
            .collect();
        for id in &expired {
            workflows.remove(id);
        }
        drop(workflows);

        if !expired.is_empty() {
            if let Ok(mut signals) = self.inner.resume_signals.write() {
                for id in &expired {
                    signals.remove(id);
                }
            }
        }
        expired.len()
    }

    /// Number of retained workflow records.
    pub fn len(&self) -> usize {
        self.inner.workflows.read().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn signal(&self, workflow_id: &str) -> Option<Arc<Notify>> {
        self.inner
            .resume_signals
            .read()
            .ok()?
            .get(workflow_id)
            .cloned()
    }

    fn update<T>(
        &self,
        workflow_id: &str,
        f: impl FnOnce(&mut WorkflowState) -> WorkflowResult<T>,
    ) -> WorkflowResult<T> {
        let mut workflows =
            self.inner
                .workflows
                .write()
                .map_err(|_| WorkflowError::NotFound {
                    workflow_id: workflow_id.to_string(),
                })?;
        let state = workflows
            .get_mut(workflow_id)
            .ok_or_else(|| WorkflowError::NotFound {
                workflow_id: workflow_id.to_string(),
            })?;
        f(state)
    }

    /// Mutate a record; a vanished record is not an error for the runner.
    fn record(&self, workflow_id: &str, f: impl FnOnce(&mut WorkflowState)) {
        let _ = self.update(workflow_id, |state| {
            f(state);
            Ok(())
        });
    }

    fn mark_aborted(&self, workflow_id: &str, message: &str) {
        let now = self.inner.clock.now();
        self.record(workflow_id, |state| {
            for step in &mut state.steps {
                match step.status {
                    StepStatus::Running => {
                        step.status = StepStatus::Failed;
                        step.error = Some(message.to_string());
                        step.finished_at = Some(now);
                    }
                    StepStatus::Pending => step.status = StepStatus::Skipped,
                    _ => {}
                }
            }
            state.status = WorkflowStatus::Failed;
            state.error = Some(message.to_string());
            state.finished_at = Some(now);
        });
    }

    /// Block while a pause is requested.
    async fn wait_if_paused(&self, workflow_id: &str) {
        loop {
            let mut paused = false;
            self.record(workflow_id, |state| {
                if state.pause_requested {
                    state.status = WorkflowStatus::Paused;
                    paused = true;
                }
            });
            if !paused {
                return;
            }
            let Some(signal) = self.signal(workflow_id) else {
                return;
            };
            info!(workflow_id = %workflow_id, "Workflow paused");
            signal.notified().await;
        }
    }

    async fn drive(
        &self,
        workflow_id: &str,
        workflow: Workflow,
        mut ctx: WorkflowContext,
    ) -> WorkflowResult<WorkflowContext> {
        for (index, step) in workflow.steps.iter().enumerate() {
            self.wait_if_paused(workflow_id).await;

            let step_id = step.id();
            let now = self.inner.clock.now();
            self.record(workflow_id, |state| {
                state.status = WorkflowStatus::Running;
                if let Some(s) = state.steps.get_mut(index) {
                    s.status = StepStatus::Running;
                    s.started_at = Some(now);
                }
            });
            info!(workflow_id = %workflow_id, step_id = %step_id, "Step started");

            match step.run(&ctx).await {
                Ok(output) => {
                    ctx.insert(step_id, output);
                    let now = self.inner.clock.now();
                    let snapshot = ctx.clone();
                    self.record(workflow_id, |state| {
                        if let Some(s) = state.steps.get_mut(index) {
                            s.status = StepStatus::Completed;
                            s.finished_at = Some(now);
                        }
                        state.context = snapshot;
                    });
                    info!(workflow_id = %workflow_id, step_id = %step_id, "Step completed");
                }
                Err(e) => {
                    let message = e.to_string();
                    let now = self.inner.clock.now();
                    self.record(workflow_id, |state| {
                        for (i, s) in state.steps.iter_mut().enumerate() {
                            if i == index {
                                s.status = StepStatus::Failed;
                                s.error = Some(message.clone());
                                s.finished_at = Some(now);
                            } else if i > index {
                                s.status = StepStatus::Skipped;
                            }
                        }
                        state.status = WorkflowStatus::Failed;
                        state.error = Some(format!("step '{}' failed: {}", step_id, message));
                        state.finished_at = Some(now);
                    });
                    warn!(
                        workflow_id = %workflow_id,
                        step_id = %step_id,
                        error = %message,
                        "Step failed, workflow halted"
                    );
                    return Err(WorkflowError::StepFailed {
                        step_id: step_id.to_string(),
                        message,
                    });
                }
            }
        }

        let now = self.inner.clock.now();
        self.record(workflow_id, |state| {
            state.status = WorkflowStatus::Completed;
            state.finished_at = Some(now);
            state.pause_requested = false;
        });
        info!(workflow_id = %workflow_id, workflow = %workflow.name, "Workflow completed");
        Ok(ctx)
    }
}
