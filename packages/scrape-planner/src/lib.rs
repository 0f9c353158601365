//! Container & Pagination Resolution Engine
//!
//! Given a list page and one example item URL, works out which element
//! groups the repeated items, which selector yields one link per item, and
//! how to reach the next page. The results become a versioned,
//! confidence-scored scraping plan that goes through human review before
//! it is executed.
//!
//! # Design Philosophy
//!
//! - Heuristics first, learned model second, pattern filtering last
//! - Every model suggestion is re-validated against the DOM
//! - Resolution never fails: confidence says how far to trust the result
//! - The library never fetches pages or runs inference itself
//!
//! # Usage
//!
//! ```rust,ignore
//! use scrape_planner::{PlanGenerator, PlanGenerationRequest, PlanLifecycle, MemoryStore};
//! use scrape_planner::testing::{MockCompletion, StaticPageProvider};
//!
//! let clock = Arc::new(SystemClock);
//! let lifecycle = PlanLifecycle::new(Arc::new(MemoryStore::new()), clock.clone(), config.clone());
//! let generator = PlanGenerator::new(completion, pages, lifecycle, clock, config);
//!
//! let generated = generator
//!     .generate(&PlanGenerationRequest::new("https://example.com/news").with_example("/a1.htm"))
//!     .await?;
//! generator.lifecycle().submit_for_review(generated.plan.plan_id, Some("me")).await?;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Seams to the completion service, store, page provider, executor
//! - [`types`] - Analyses, plans, lifecycle records, configuration
//! - [`pipeline`] - Container/pagination resolvers, synthesis, validation
//! - [`workflow`] - Step engine and the plan generation workflow
//! - [`lifecycle`] - Durable plan status, versions, approvals, executions
//! - [`schedule`] - Cron validation and next-run computation
//! - [`testing`] - Mock implementations for testing

pub mod cache;
pub mod dom;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod schedule;
pub mod similarity;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;
pub mod workflow;

#[cfg(feature = "openai")]
pub mod ai;

// Re-export core types at crate root
pub use error::{
    CompletionError, LifecycleError, PlannerError, Result, ScheduleError, StoreError,
    WorkflowError,
};
pub use traits::{
    completion::{CompletionRequest, CompletionResponse, CompletionService, ResponseFormat},
    executor::{ExecutionSummary, PlanExecutor},
    page::PageProvider,
    store::KeyValueStore,
};
pub use types::{
    analysis::{
        ContainerAnalysis, ContainerMethod, DetailSelectors, PaginationAnalysis, PaginationMethod,
    },
    config::PlannerConfig,
    lifecycle::{
        Approval, ApprovalDecision, AuditEvent, ExecutionRecord, ExecutionStatus,
        PlanLifecycleStatus, PlanStatus,
    },
    page::PageSnapshot,
    plan::{IssueSeverity, PlanId, PlanMetadata, PlanModification, ScrapingPlan, ValidationIssue},
};

// Re-export pipeline components
pub use pipeline::{
    validate_plan, ContainerResolver, PaginationResolver, PlanSynthesizer, SynthesisOptions,
};

pub use cache::{Clock, SystemClock, TtlCache};
pub use lifecycle::{ExecutionHandle, PlanLifecycle};
pub use schedule::{calculate_next_run, is_valid_cron_expression, CronSchedule};
pub use similarity::{is_content_link, normalize_url, url_similarity};
pub use stores::MemoryStore;
pub use workflow::{
    GeneratedPlan, PlanGenerationRequest, PlanGenerator, Workflow, WorkflowEngine, WorkflowState,
    WorkflowStatus, WorkflowStep,
};
