//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the planner without
//! a real completion service, browser or crawler.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::cache::Clock;
use crate::error::{CompletionError, CompletionResult, PlannerError, Result};
use crate::traits::{
    completion::{CompletionRequest, CompletionResponse, CompletionService},
    executor::{ExecutionSummary, PlanExecutor},
    page::PageProvider,
};
use crate::types::page::PageSnapshot;
use crate::types::plan::ScrapingPlan;

/// A mock completion service.
///
/// Responses are served in the order they were queued; the last one
/// repeats once the queue is down to it. With nothing queued, every call
/// fails as if the service were unavailable.
#[derive(Default)]
pub struct MockCompletion {
    responses: Arc<RwLock<VecDeque<String>>>,

    /// Simulated latency per call
    delay: Option<Duration>,

    /// Prompts received, for assertions
    calls: Arc<RwLock<Vec<CompletionRequest>>>,
}

impl MockCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// A service that always fails.
    pub fn failing() -> Self {
        Self::default()
    }

    /// Queue a raw response body.
    pub fn with_response(self, content: impl Into<String>) -> Self {
        self.responses.write().unwrap().push_back(content.into());
        self
    }

    /// Delay every answer, e.g. to trip the resolver timeout.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get all requests made to this mock.
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }
}

#[async_trait]
impl CompletionService for MockCompletion {
    async fn complete(&self, request: CompletionRequest) -> CompletionResult<CompletionResponse> {
        self.calls.write().unwrap().push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut responses = self.responses.write().unwrap();
        let content = if responses.len() > 1 {
            responses.pop_front()
        } else {
            responses.front().cloned()
        };
        content
            .map(CompletionResponse::new)
            .ok_or_else(|| CompletionError::Unavailable("no mock response queued".to_string()))
    }
}

/// Serves snapshots from a fixed URL → HTML map.
#[derive(Default, Clone)]
pub struct StaticPageProvider {
    pages: Arc<RwLock<HashMap<String, String>>>,
}

impl StaticPageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.write().unwrap().insert(url.into(), html.into());
        self
    }
}

#[async_trait]
impl PageProvider for StaticPageProvider {
    async fn snapshot(&self, url: &str) -> Result<PageSnapshot> {
        let html = self.pages.read().unwrap().get(url).cloned();
        html.map(|html| PageSnapshot::new(url, html))
            .ok_or_else(|| PlannerError::PageUnavailable {
                url: url.to_string(),
                reason: "no such page in StaticPageProvider".to_string(),
            })
    }
}

/// A mock extraction pipeline.
pub struct MockExecutor {
    outcome: std::result::Result<ExecutionSummary, String>,
    runs: Arc<RwLock<Vec<String>>>,
}

impl MockExecutor {
    /// Every run extracts `items` items from one page.
    pub fn succeeding(items: u64) -> Self {
        Self {
            outcome: Ok(ExecutionSummary {
                items_extracted: items,
                pages_visited: 1,
            }),
            runs: Arc::default(),
        }
    }

    /// Every run fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            outcome: Err(message.into()),
            runs: Arc::default(),
        }
    }

    /// Run ids executed so far.
    pub fn runs(&self) -> Vec<String> {
        self.runs.read().unwrap().clone()
    }
}

#[async_trait]
impl PlanExecutor for MockExecutor {
    async fn execute(
        &self,
        _plan: &ScrapingPlan,
        run_id: &str,
    ) -> std::result::Result<ExecutionSummary, Box<dyn std::error::Error + Send + Sync>> {
        self.runs.write().unwrap().push(run_id.to_string());
        self.outcome.clone().map_err(Into::into)
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap();
        *self.now.lock().unwrap() += by;
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

impl Default for ManualClock {
    /// Starts at 2024-01-01T00:00:00Z.
    fn default() -> Self {
        Self::at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Canned pages and plans.
pub mod fixtures {
    use super::*;
    use crate::types::analysis::{ContainerMethod, PaginationMethod};
    use crate::types::plan::{PlanId, PlanMetadata};

    /// A municipal news list: five `li > a` items plus site chrome.
    pub const NEWS_LIST_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Aktuelles</title></head>
<body>
  <header>
    <nav class="main-nav">
      <a href="/">Home</a>
      <a href="/about">About</a>
      <a href="/impressum">Impressum</a>
    </nav>
  </header>
  <main>
    <h1>Aktuelles</h1>
    <ul class="news-list">
      <li><a href="/a1.htm">Title 1</a></li>
      <li><a href="/a2.htm">Title 2</a></li>
      <li><a href="/a3.htm">Title 3</a></li>
      <li><a href="/a4.htm">Title 4</a></li>
      <li><a href="/a5.htm">Title 5</a></li>
    </ul>
  </main>
  <footer><a href="/datenschutz">Datenschutz</a></footer>
</body>
</html>"#;

    /// A list with a numbered pager and a `rel="next"` link.
    pub const REL_NEXT_PAGE: &str = r#"<!DOCTYPE html>
<html>
<body>
  <ul class="news-list">
    <li><a href="/a1.htm">Title 1</a></li>
  </ul>
  <nav class="pagination">
    <a href="/news">1</a>
    <a href="/page/2">2</a>
    <a rel="next" href="/page/2">Next</a>
  </nav>
</body>
</html>"#;

    /// A version-1 plan with fixed timestamps and a current content hash.
    pub fn plan(entry_url: &str, list_selector: &str, content_link_selector: &str) -> ScrapingPlan {
        let mut plan = ScrapingPlan {
            plan_id: PlanId::new(),
            version: 1,
            entry_urls: vec![entry_url.to_string()],
            list_selector: list_selector.to_string(),
            content_link_selector: Some(content_link_selector.to_string()),
            pagination_selector: None,
            detail_selectors: BTreeMap::new(),
            confidence_score: 0.6,
            metadata: PlanMetadata {
                name: None,
                description: None,
                created_at: ManualClock::default().now(),
                container_method: ContainerMethod::Heuristic,
                pagination_method: PaginationMethod::None,
                reasoning: Vec::new(),
                warnings: Vec::new(),
                content_hash: String::new(),
                schedule: None,
                max_pages: None,
                tags: Vec::new(),
            },
        };
        plan.refresh_content_hash();
        plan
    }
}
