//! Contract with the extraction pipeline that runs approved plans.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::plan::ScrapingPlan;

/// Outcome of one execution run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub items_extracted: u64,

    pub pages_visited: u64,
}

/// Runs an approved plan against the live site.
#[async_trait]
pub trait PlanExecutor: Send + Sync {
    async fn execute(
        &self,
        plan: &ScrapingPlan,
        run_id: &str,
    ) -> std::result::Result<ExecutionSummary, Box<dyn std::error::Error + Send + Sync>>;
}
