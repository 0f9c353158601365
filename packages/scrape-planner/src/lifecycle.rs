//! Durable plan lifecycle.
//!
//! Every plan has one status record (`plan_status:{id}`) and one immutable
//! record per version (`plan:{id}:{version}`). Status changes are
//! compare-and-swap writes against the record that was read, retried a
//! bounded number of times, so concurrent reviewers never lose updates.
//!
//! ```text
//! draft ─► pending_review ─► approved ─► executing ─► approved
//!   ▲            │    │                      │
//!   └────────────┘    └─► rejected           └─► failed ─► executing
//!
//! any state (except deprecated) ─► deprecated
//! ```
//!
//! Modifying a plan always persists `version + 1` as a new draft; approvals
//! are per version and never carry over.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::Clock;
use crate::error::{LifecycleError, LifecycleResult, StoreError};
use crate::pipeline::synthesis::PlanSynthesizer;
use crate::schedule::{calculate_next_run, CronSchedule};
use crate::traits::executor::PlanExecutor;
use crate::traits::store::{
    execution_key, plan_events_key, plan_key, plan_status_key, KeyValueStore,
};
use crate::types::config::PlannerConfig;
use crate::types::lifecycle::{
    Approval, ApprovalDecision, AuditEvent, ExecutionRecord, ExecutionStatus,
    PlanLifecycleStatus, PlanStatus,
};
use crate::types::plan::{PlanId, PlanModification, ScrapingPlan};

const PLAN_FIELD: &str = "plan";
const RECORD_FIELD: &str = "record";

fn to_json<T: serde::Serialize>(value: &T) -> LifecycleResult<String> {
    serde_json::to_string(value).map_err(|e| LifecycleError::Store(StoreError::from(e)))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> LifecycleResult<T> {
    serde_json::from_str(raw).map_err(|e| LifecycleError::Store(StoreError::from(e)))
}

fn not_approved(plan_id: PlanId, version: u32) -> LifecycleError {
    LifecycleError::InvalidTransition {
        plan_id: plan_id.to_string(),
        from: format!("version {} not approved", version),
        to: PlanStatus::Executing.to_string(),
    }
}

/// Handle to a background execution.
///
/// Dropping it detaches the run; the execution record still captures the outcome.
pub struct ExecutionHandle {
    /// The record as durably queued
    pub record: ExecutionRecord,
    lifecycle: PlanLifecycle,
    task: JoinHandle<()>,
}

impl ExecutionHandle {
    /// Wait for the run to finish and read back its final record.
    pub async fn finished(self) -> LifecycleResult<ExecutionRecord> {
        if let Err(e) = self.task.await {
            error!(run_id = %self.record.run_id, error = %e, "Execution task aborted");
        }
        self.lifecycle.execution(&self.record.run_id).await
    }
}

/// Plan status, versions, approvals, audit trail and executions.
#[derive(Clone)]
pub struct PlanLifecycle {
    store: Arc<dyn KeyValueStore>,
    synthesizer: PlanSynthesizer,
    clock: Arc<dyn Clock>,
    config: PlannerConfig,
}

impl PlanLifecycle {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, config: PlannerConfig) -> Self {
        Self {
            store,
            synthesizer: PlanSynthesizer::new(clock.clone()),
            clock,
            config,
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn status(&self, plan_id: PlanId) -> LifecycleResult<PlanLifecycleStatus> {
        let raw = self
            .store
            .hget(&plan_status_key(&plan_id.to_string()), RECORD_FIELD)
            .await?
            .ok_or_else(|| LifecycleError::PlanNotFound {
                plan_id: plan_id.to_string(),
            })?;
        from_json(&raw)
    }

    /// A specific persisted version.
    pub async fn get_plan(&self, plan_id: PlanId, version: u32) -> LifecycleResult<ScrapingPlan> {
        let raw = self
            .store
            .hget(&plan_key(&plan_id.to_string(), version), PLAN_FIELD)
            .await?
            .ok_or_else(|| LifecycleError::VersionNotFound {
                plan_id: plan_id.to_string(),
                version,
            })?;
        from_json(&raw)
    }

    /// The latest version.
    pub async fn current_plan(&self, plan_id: PlanId) -> LifecycleResult<ScrapingPlan> {
        let status = self.status(plan_id).await?;
        self.get_plan(plan_id, status.current_version).await
    }

    /// Every persisted version, oldest first.
    pub async fn versions(&self, plan_id: PlanId) -> LifecycleResult<Vec<ScrapingPlan>> {
        let status = self.status(plan_id).await?;
        let mut plans = Vec::with_capacity(status.current_version as usize);
        for version in 1..=status.current_version {
            plans.push(self.get_plan(plan_id, version).await?);
        }
        Ok(plans)
    }

    /// Audit events, newest first.
    pub async fn audit_trail(&self, plan_id: PlanId, limit: usize) -> LifecycleResult<Vec<AuditEvent>> {
        let raw = self
            .store
            .lrange(&plan_events_key(&plan_id.to_string()), limit)
            .await?;
        raw.iter().map(|r| from_json(r)).collect()
    }

    pub async fn execution(&self, run_id: &str) -> LifecycleResult<ExecutionRecord> {
        let raw = self
            .store
            .hget(&execution_key(run_id), RECORD_FIELD)
            .await?
            .ok_or_else(|| LifecycleError::ExecutionNotFound {
                run_id: run_id.to_string(),
            })?;
        from_json(&raw)
    }

    /// Next scheduled run of the current version, if it carries a schedule.
    pub async fn next_run(
        &self,
        plan_id: PlanId,
        now: DateTime<Utc>,
    ) -> LifecycleResult<Option<DateTime<Utc>>> {
        let plan = self.current_plan(plan_id).await?;
        Ok(plan
            .metadata
            .schedule
            .as_deref()
            .map(|expr| calculate_next_run(expr, now)))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Persist version 1 of a new plan as a draft.
    pub async fn create_draft(
        &self,
        plan: &ScrapingPlan,
        actor: Option<&str>,
    ) -> LifecycleResult<PlanLifecycleStatus> {
        let plan_id = plan.plan_id;
        if plan.version != 1 {
            return Err(LifecycleError::VersionConflict {
                plan_id: plan_id.to_string(),
                expected: 1,
                actual: plan.version,
            });
        }
        if let Some(schedule) = &plan.metadata.schedule {
            CronSchedule::parse(schedule)?;
        }

        let status_key = plan_status_key(&plan_id.to_string());
        if self.store.hget(&status_key, RECORD_FIELD).await?.is_some() {
            return Err(LifecycleError::AlreadyExists {
                plan_id: plan_id.to_string(),
            });
        }

        if !self.persist_version(plan, false).await? {
            return Err(LifecycleError::AlreadyExists {
                plan_id: plan_id.to_string(),
            });
        }

        let now = self.clock.now();
        let status = PlanLifecycleStatus::new_draft(plan_id, now);
        let created = self
            .store
            .hset_if(&status_key, RECORD_FIELD, None, &to_json(&status)?)
            .await?;
        if !created {
            return Err(LifecycleError::AlreadyExists {
                plan_id: plan_id.to_string(),
            });
        }

        self.audit(AuditEvent {
            plan_id,
            version: 1,
            from: None,
            to: PlanStatus::Draft,
            actor: actor.map(str::to_string),
            note: Some("created".to_string()),
            at: now,
        })
        .await;

        info!(plan_id = %plan_id, confidence = plan.confidence_score, "Plan draft created");
        Ok(status)
    }

    pub async fn submit_for_review(
        &self,
        plan_id: PlanId,
        actor: Option<&str>,
    ) -> LifecycleResult<PlanLifecycleStatus> {
        self.transition(plan_id, PlanStatus::PendingReview, None, actor, None, |_| Ok(()))
            .await
    }

    /// Approve `version`; fails if a newer version exists.
    pub async fn approve(
        &self,
        plan_id: PlanId,
        version: u32,
        reviewer: &str,
        comment: Option<&str>,
    ) -> LifecycleResult<PlanLifecycleStatus> {
        self.review(plan_id, version, reviewer, comment, ApprovalDecision::Approved)
            .await
    }

    /// Reject `version`; fails if a newer version exists.
    pub async fn reject(
        &self,
        plan_id: PlanId,
        version: u32,
        reviewer: &str,
        comment: Option<&str>,
    ) -> LifecycleResult<PlanLifecycleStatus> {
        self.review(plan_id, version, reviewer, comment, ApprovalDecision::Rejected)
            .await
    }

    /// Send a plan under review back to draft.
    pub async fn request_changes(
        &self,
        plan_id: PlanId,
        reviewer: &str,
        comment: Option<&str>,
    ) -> LifecycleResult<PlanLifecycleStatus> {
        self.transition(
            plan_id,
            PlanStatus::Draft,
            None,
            Some(reviewer),
            comment,
            |_| Ok(()),
        )
        .await
    }

    pub async fn deprecate(
        &self,
        plan_id: PlanId,
        actor: Option<&str>,
        reason: Option<&str>,
    ) -> LifecycleResult<PlanLifecycleStatus> {
        self.transition(plan_id, PlanStatus::Deprecated, None, actor, reason, |_| Ok(()))
            .await
    }

    async fn review(
        &self,
        plan_id: PlanId,
        version: u32,
        reviewer: &str,
        comment: Option<&str>,
        decision: ApprovalDecision,
    ) -> LifecycleResult<PlanLifecycleStatus> {
        let to = match decision {
            ApprovalDecision::Approved => PlanStatus::Approved,
            ApprovalDecision::Rejected => PlanStatus::Rejected,
        };
        let now = self.clock.now();
        self.transition(plan_id, to, Some(version), Some(reviewer), comment, |status| {
            status.approvals.push(Approval {
                reviewer: reviewer.to_string(),
                version,
                decision,
                comment: comment.map(str::to_string),
                decided_at: now,
            });
            Ok(())
        })
        .await
    }

    /// Apply a modification to `expected_version`, persisting `version + 1` as a draft.
    pub async fn modify(
        &self,
        plan_id: PlanId,
        expected_version: u32,
        modification: &PlanModification,
    ) -> LifecycleResult<ScrapingPlan> {
        if let Some(Some(schedule)) = &modification.schedule {
            CronSchedule::parse(schedule)?;
        }

        let key = plan_status_key(&plan_id.to_string());
        let mut written: Option<u32> = None;

        for attempt in 1..=self.config.cas_retries {
            let raw = self
                .store
                .hget(&key, RECORD_FIELD)
                .await?
                .ok_or_else(|| LifecycleError::PlanNotFound {
                    plan_id: plan_id.to_string(),
                })?;
            let mut status: PlanLifecycleStatus = from_json(&raw)?;

            if status.current_version != expected_version {
                return Err(LifecycleError::VersionConflict {
                    plan_id: plan_id.to_string(),
                    expected: expected_version,
                    actual: status.current_version,
                });
            }
            if !status.status.allows_modification() {
                return Err(LifecycleError::InvalidTransition {
                    plan_id: plan_id.to_string(),
                    from: status.status.to_string(),
                    to: PlanStatus::Draft.to_string(),
                });
            }

            let base = self.get_plan(plan_id, expected_version).await?;
            let revised = self.synthesizer.revise(&base, modification);
            if revised.metadata.content_hash == base.metadata.content_hash
                && revised.confidence_score == base.confidence_score
            {
                return Err(LifecycleError::NoChanges {
                    plan_id: plan_id.to_string(),
                });
            }

            // A version we wrote on an earlier attempt is not referenced yet
            let overwrite = written == Some(revised.version);
            if !self.persist_version(&revised, overwrite).await?
                && !self.replace_orphan(&revised, &key, &raw).await?
            {
                // Another writer is mid-modification; its status update decides
                debug!(plan_id = %plan_id, attempt, "Version taken concurrently, retrying modification");
                tokio::task::yield_now().await;
                continue;
            }
            written = Some(revised.version);

            let from = status.status;
            let now = self.clock.now();
            status.status = PlanStatus::Draft;
            status.current_version = revised.version;
            status.updated_at = now;

            if self
                .store
                .hset_if(&key, RECORD_FIELD, Some(&raw), &to_json(&status)?)
                .await?
            {
                self.audit(AuditEvent {
                    plan_id,
                    version: revised.version,
                    from: Some(from),
                    to: PlanStatus::Draft,
                    actor: modification.modified_by.clone(),
                    note: Some(format!("modified from version {}", expected_version)),
                    at: now,
                })
                .await;
                info!(
                    plan_id = %plan_id,
                    version = revised.version,
                    "Plan modified, new draft version"
                );
                return Ok(revised);
            }
            debug!(plan_id = %plan_id, attempt, "Status changed concurrently, retrying modification");
        }

        Err(LifecycleError::Contention {
            plan_id: plan_id.to_string(),
            attempts: self.config.cas_retries,
        })
    }

    /// Start a background execution of the current (approved) version.
    ///
    /// Returns once the execution record is durably queued. Failures of the
    /// run are captured on the record and move the plan to `failed`.
    pub async fn execute(
        &self,
        plan_id: PlanId,
        executor: Arc<dyn PlanExecutor>,
        actor: Option<&str>,
    ) -> LifecycleResult<ExecutionHandle> {
        let current = self.status(plan_id).await?;
        if !current.status.can_transition_to(PlanStatus::Executing) {
            return Err(LifecycleError::InvalidTransition {
                plan_id: plan_id.to_string(),
                from: current.status.to_string(),
                to: PlanStatus::Executing.to_string(),
            });
        }
        if !current.is_current_version_approved() {
            return Err(not_approved(plan_id, current.current_version));
        }

        // The queued record is durable before the status points at it
        let mut record = ExecutionRecord::queued(plan_id, current.current_version, self.clock.now());
        self.save_execution(&record).await?;

        let run_id = record.run_id.clone();
        let max_history = self.config.max_execution_history;
        let committed = self
            .transition(
                plan_id,
                PlanStatus::Executing,
                Some(record.version),
                actor,
                None,
                |status| {
                    if !status.is_current_version_approved() {
                        return Err(not_approved(plan_id, status.current_version));
                    }
                    status.execution_history.push(run_id.clone());
                    if status.execution_history.len() > max_history {
                        let excess = status.execution_history.len() - max_history;
                        status.execution_history.drain(..excess);
                    }
                    Ok(())
                },
            )
            .await;

        if let Err(e) = committed {
            record.status = ExecutionStatus::Failed;
            record.finished_at = Some(self.clock.now());
            record.error = Some(format!("not started: {}", e));
            if let Err(save) = self.save_execution(&record).await {
                warn!(run_id = %record.run_id, error = %save, "Failed to record unstarted execution");
            }
            return Err(e);
        }

        info!(plan_id = %plan_id, run_id = %record.run_id, version = record.version, "Execution queued");

        let lifecycle = self.clone();
        let run = record.clone();
        let task = tokio::spawn(async move {
            lifecycle.run_execution(run, executor).await;
        });

        Ok(ExecutionHandle {
            record,
            lifecycle: self.clone(),
            task,
        })
    }

    async fn run_execution(&self, mut record: ExecutionRecord, executor: Arc<dyn PlanExecutor>) {
        let plan_id = record.plan_id;
        let run_id = record.run_id.clone();

        record.status = ExecutionStatus::Running;
        record.started_at = Some(self.clock.now());
        if let Err(e) = self.save_execution(&record).await {
            error!(run_id = %run_id, error = %e, "Failed to mark execution running");
        }

        let outcome = match self.get_plan(plan_id, record.version).await {
            Ok(plan) => executor
                .execute(&plan, &run_id)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        record.finished_at = Some(self.clock.now());
        let next = match outcome {
            Ok(summary) => {
                record.status = ExecutionStatus::Completed;
                record.items_extracted = Some(summary.items_extracted);
                info!(
                    plan_id = %plan_id,
                    run_id = %run_id,
                    items = summary.items_extracted,
                    pages = summary.pages_visited,
                    "Execution completed"
                );
                PlanStatus::Approved
            }
            Err(message) => {
                error!(plan_id = %plan_id, run_id = %run_id, error = %message, "Execution failed");
                record.status = ExecutionStatus::Failed;
                record.error = Some(message);
                PlanStatus::Failed
            }
        };

        if let Err(e) = self.save_execution(&record).await {
            error!(run_id = %run_id, error = %e, "Failed to record execution outcome");
        }
        let note = format!("run {}", run_id);
        if let Err(e) = self
            .transition(plan_id, next, None, None, Some(&note), |_| Ok(()))
            .await
        {
            error!(plan_id = %plan_id, run_id = %run_id, error = %e, "Failed to leave executing state");
        }
    }

    async fn save_execution(&self, record: &ExecutionRecord) -> LifecycleResult<()> {
        self.store
            .hset(&execution_key(&record.run_id), RECORD_FIELD, &to_json(record)?)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Write an immutable version record; false if the version already exists.
    async fn persist_version(&self, plan: &ScrapingPlan, overwrite: bool) -> LifecycleResult<bool> {
        let key = plan_key(&plan.plan_id.to_string(), plan.version);
        let json = to_json(plan)?;
        if overwrite {
            self.store.hset(&key, PLAN_FIELD, &json).await?;
            return Ok(true);
        }
        Ok(self.store.hset_if(&key, PLAN_FIELD, None, &json).await?)
    }

    /// Take over a version record no status points at.
    ///
    /// A modification that failed after persisting `version` leaves the
    /// record behind. It is replaced when it holds the same edit (a retry)
    /// or is older than `orphan_version_ttl_secs`, and only while the status
    /// record is still the one `modify` read.
    async fn replace_orphan(
        &self,
        plan: &ScrapingPlan,
        status_key: &str,
        status_raw: &str,
    ) -> LifecycleResult<bool> {
        let key = plan_key(&plan.plan_id.to_string(), plan.version);
        let Some(existing_raw) = self.store.hget(&key, PLAN_FIELD).await? else {
            return Ok(false);
        };
        let existing: ScrapingPlan = from_json(&existing_raw)?;

        let same_edit = existing.metadata.content_hash == plan.metadata.content_hash
            && existing.confidence_score == plan.confidence_score;
        let ttl = i64::try_from(self.config.orphan_version_ttl_secs).unwrap_or(i64::MAX);
        let age = (self.clock.now() - existing.metadata.created_at).num_seconds();
        if !same_edit && age < ttl {
            return Ok(false);
        }

        let current = self.store.hget(status_key, RECORD_FIELD).await?;
        if current.as_deref() != Some(status_raw) {
            return Ok(false);
        }

        let replaced = self
            .store
            .hset_if(&key, PLAN_FIELD, Some(&existing_raw), &to_json(plan)?)
            .await?;
        if replaced {
            warn!(
                plan_id = %plan.plan_id,
                version = plan.version,
                same_edit,
                "Replaced unreferenced plan version left by a failed modification"
            );
        }
        Ok(replaced)
    }

    /// Compare-and-swap a status change, retrying on concurrent writes.
    async fn transition<F>(
        &self,
        plan_id: PlanId,
        to: PlanStatus,
        expected_version: Option<u32>,
        actor: Option<&str>,
        note: Option<&str>,
        mut apply: F,
    ) -> LifecycleResult<PlanLifecycleStatus>
    where
        F: FnMut(&mut PlanLifecycleStatus) -> LifecycleResult<()> + Send,
    {
        let key = plan_status_key(&plan_id.to_string());

        for attempt in 1..=self.config.cas_retries {
            let raw = self
                .store
                .hget(&key, RECORD_FIELD)
                .await?
                .ok_or_else(|| LifecycleError::PlanNotFound {
                    plan_id: plan_id.to_string(),
                })?;
            let mut status: PlanLifecycleStatus = from_json(&raw)?;

            if let Some(expected) = expected_version {
                if expected != status.current_version {
                    return Err(LifecycleError::VersionConflict {
                        plan_id: plan_id.to_string(),
                        expected,
                        actual: status.current_version,
                    });
                }
            }

            let from = status.status;
            if !from.can_transition_to(to) {
                return Err(LifecycleError::InvalidTransition {
                    plan_id: plan_id.to_string(),
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }

            let now = self.clock.now();
            status.status = to;
            status.updated_at = now;
            apply(&mut status)?;

            if self
                .store
                .hset_if(&key, RECORD_FIELD, Some(&raw), &to_json(&status)?)
                .await?
            {
                self.audit(AuditEvent {
                    plan_id,
                    version: status.current_version,
                    from: Some(from),
                    to,
                    actor: actor.map(str::to_string),
                    note: note.map(str::to_string),
                    at: now,
                })
                .await;
                info!(plan_id = %plan_id, from = %from, to = %to, "Plan status changed");
                return Ok(status);
            }
            debug!(plan_id = %plan_id, attempt, "Status changed concurrently, retrying");
        }

        Err(LifecycleError::Contention {
            plan_id: plan_id.to_string(),
            attempts: self.config.cas_retries,
        })
    }

    /// Append to the audit trail; the transition is already committed, so failures only warn.
    async fn audit(&self, event: AuditEvent) {
        let key = plan_events_key(&event.plan_id.to_string());
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                warn!(plan_id = %event.plan_id, error = %e, "Failed to serialize audit event");
                return;
            }
        };
        if let Err(e) = self.store.lpush(&key, &json).await {
            warn!(plan_id = %event.plan_id, error = %e, "Failed to append audit event");
            return;
        }
        if let Err(e) = self.store.ltrim(&key, self.config.max_audit_events).await {
            warn!(plan_id = %event.plan_id, error = %e, "Failed to trim audit trail");
        }
    }
}
