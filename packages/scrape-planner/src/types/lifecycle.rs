//! Lifecycle records: plan status, approvals and execution runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::plan::PlanId;

/// Lifecycle status of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    PendingReview,
    Approved,
    Rejected,
    Deprecated,
    Executing,
    Failed,
}

impl PlanStatus {
    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(self, to: PlanStatus) -> bool {
        use PlanStatus::*;
        match (self, to) {
            (Deprecated, _) => false,
            (_, Deprecated) => true,
            (Draft, PendingReview) => true,
            (PendingReview, Approved | Rejected | Draft) => true,
            (Approved, Executing) => true,
            (Executing, Approved | Failed) => true,
            (Failed, Executing) => true,
            _ => false,
        }
    }

    /// Whether a new version may be derived from a plan in this status.
    pub fn allows_modification(self) -> bool {
        !matches!(self, PlanStatus::Executing | PlanStatus::Deprecated)
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanStatus::Draft => write!(f, "draft"),
            PlanStatus::PendingReview => write!(f, "pending_review"),
            PlanStatus::Approved => write!(f, "approved"),
            PlanStatus::Rejected => write!(f, "rejected"),
            PlanStatus::Deprecated => write!(f, "deprecated"),
            PlanStatus::Executing => write!(f, "executing"),
            PlanStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for PlanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PlanStatus::Draft),
            "pending_review" => Ok(PlanStatus::PendingReview),
            "approved" => Ok(PlanStatus::Approved),
            "rejected" => Ok(PlanStatus::Rejected),
            "deprecated" => Ok(PlanStatus::Deprecated),
            "executing" => Ok(PlanStatus::Executing),
            "failed" => Ok(PlanStatus::Failed),
            _ => Err(format!("Invalid plan status: {}", s)),
        }
    }
}

/// Reviewer decision on a specific plan version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

/// A review recorded against one version of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub reviewer: String,

    /// Version that was reviewed; approvals never carry over
    pub version: u32,

    pub decision: ApprovalDecision,

    #[serde(default)]
    pub comment: Option<String>,

    pub decided_at: DateTime<Utc>,
}

/// The single status record kept per plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanLifecycleStatus {
    pub plan_id: PlanId,

    pub status: PlanStatus,

    /// Always the latest persisted version
    pub current_version: u32,

    #[serde(default)]
    pub approvals: Vec<Approval>,

    /// Run ids, oldest first
    #[serde(default)]
    pub execution_history: Vec<String>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl PlanLifecycleStatus {
    /// Fresh record for a new draft at version 1.
    pub fn new_draft(plan_id: PlanId, now: DateTime<Utc>) -> Self {
        Self {
            plan_id,
            status: PlanStatus::Draft,
            current_version: 1,
            approvals: Vec::new(),
            execution_history: Vec::new(),
            updated_at: now,
        }
    }

    /// Whether the current version carries an approval.
    pub fn is_current_version_approved(&self) -> bool {
        self.approvals
            .iter()
            .rev()
            .find(|a| a.version == self.current_version)
            .map(|a| a.decision == ApprovalDecision::Approved)
            .unwrap_or(false)
    }
}

/// Status of a background execution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

/// Durable record of one execution of an approved plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub run_id: String,

    pub plan_id: PlanId,

    pub version: u32,

    pub status: ExecutionStatus,

    pub queued_at: DateTime<Utc>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub items_extracted: Option<u64>,

    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionRecord {
    pub fn queued(plan_id: PlanId, version: u32, now: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::now_v7().to_string(),
            plan_id,
            version,
            status: ExecutionStatus::Queued,
            queued_at: now,
            started_at: None,
            finished_at: None,
            items_extracted: None,
            error: None,
        }
    }
}

/// Entry in a plan's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub plan_id: PlanId,

    pub version: u32,

    #[serde(default)]
    pub from: Option<PlanStatus>,

    pub to: PlanStatus,

    #[serde(default)]
    pub actor: Option<String>,

    #[serde(default)]
    pub note: Option<String>,

    pub at: DateTime<Utc>,
}
