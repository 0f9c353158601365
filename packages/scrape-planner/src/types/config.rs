//! Planner configuration.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::{PlannerError, Result};

/// Bounds for the completion-service timeout, in seconds.
const MIN_COMPLETION_TIMEOUT_SECS: u64 = 5;
const MAX_COMPLETION_TIMEOUT_SECS: u64 = 30;

/// Tunables for resolution, workflows and the lifecycle store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Completion-service timeout, clamped into 5..=30 seconds.
    ///
    /// A timeout rejects the current tier; it never fails a workflow.
    pub completion_timeout_secs: u64,

    /// Sampling temperature sent to the completion service.
    pub model_temperature: f32,

    /// Max tokens requested from the completion service.
    pub model_max_tokens: u32,

    /// HTML excerpts are truncated to this many characters before prompting.
    pub max_prompt_html_chars: usize,

    /// Deduplicated content links a container must hold (inclusive range).
    pub min_container_links: usize,
    pub max_container_links: usize,

    /// Similarity to the example URL required in pattern-based filtering.
    pub similarity_threshold: f32,

    /// Lowered threshold when both URLs share a domain filename pattern.
    pub domain_pattern_threshold: f32,

    /// How long finished workflow records stay inspectable.
    pub workflow_retention_secs: u64,

    /// TTL of cached container analyses.
    pub analysis_cache_ttl_secs: u64,

    /// Run ids kept on a plan status record.
    pub max_execution_history: usize,

    /// Audit events kept per plan.
    pub max_audit_events: usize,

    /// Compare-and-swap attempts before reporting contention.
    pub cas_retries: u32,

    /// Age after which an unreferenced version record left by a failed
    /// modification may be replaced by a different edit.
    pub orphan_version_ttl_secs: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            completion_timeout_secs: 20,
            model_temperature: 0.1,
            model_max_tokens: 1500,
            max_prompt_html_chars: 15_000,
            min_container_links: 3,
            max_container_links: 100,
            similarity_threshold: 0.6,
            domain_pattern_threshold: 0.5,
            workflow_retention_secs: 3600,
            analysis_cache_ttl_secs: 900,
            max_execution_history: 50,
            max_audit_events: 100,
            cas_retries: 5,
            orphan_version_ttl_secs: 60,
        }
    }
}

impl PlannerConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenvy::dotenv();

        let mut config = Self::default();
        if let Some(secs) = env_parse::<u64>("PLANNER_COMPLETION_TIMEOUT_SECS")? {
            config.completion_timeout_secs = secs;
        }
        if let Some(secs) = env_parse::<u64>("PLANNER_WORKFLOW_RETENTION_SECS")? {
            config.workflow_retention_secs = secs;
        }
        if let Some(secs) = env_parse::<u64>("PLANNER_CACHE_TTL_SECS")? {
            config.analysis_cache_ttl_secs = secs;
        }
        if let Some(chars) = env_parse::<usize>("PLANNER_MAX_PROMPT_CHARS")? {
            config.max_prompt_html_chars = chars;
        }
        Ok(config)
    }

    /// Set the completion timeout in seconds.
    pub fn with_completion_timeout_secs(mut self, secs: u64) -> Self {
        self.completion_timeout_secs = secs;
        self
    }

    /// Set the workflow retention window in seconds.
    pub fn with_workflow_retention_secs(mut self, secs: u64) -> Self {
        self.workflow_retention_secs = secs;
        self
    }

    /// Set the analysis cache TTL in seconds.
    pub fn with_analysis_cache_ttl_secs(mut self, secs: u64) -> Self {
        self.analysis_cache_ttl_secs = secs;
        self
    }

    /// Set the prompt excerpt size.
    pub fn with_max_prompt_html_chars(mut self, chars: usize) -> Self {
        self.max_prompt_html_chars = chars;
        self
    }

    /// Set how long an unreferenced version record blocks other edits.
    pub fn with_orphan_version_ttl_secs(mut self, secs: u64) -> Self {
        self.orphan_version_ttl_secs = secs;
        self
    }

    /// Completion timeout clamped into the supported window.
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(
            self.completion_timeout_secs
                .clamp(MIN_COMPLETION_TIMEOUT_SECS, MAX_COMPLETION_TIMEOUT_SECS),
        )
    }

    pub fn workflow_retention(&self) -> Duration {
        Duration::from_secs(self.workflow_retention_secs)
    }

    pub fn analysis_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.analysis_cache_ttl_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| PlannerError::Config(format!("{} must be a valid number", key))),
        Err(_) => Ok(None),
    }
}
