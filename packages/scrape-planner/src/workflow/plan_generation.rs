//! Plan generation workflow
//!
//! Turns an entry URL into a persisted draft plan:
//! 1. Load the list page (and optionally a detail page)
//! 2. Resolve the content container for each example URL, concurrently
//! 3. Resolve pagination inside the chosen container's region
//! 4. Synthesize the plan and validate it against the loaded pages
//! 5. Persist version 1 as a draft, optionally submitting it for review

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{Clock, TtlCache};
use crate::dom::Dom;
use crate::error::Result;
use crate::lifecycle::PlanLifecycle;
use crate::pipeline::{
    validate_plan, ContainerResolver, PaginationResolver, PlanSynthesizer, SynthesisOptions,
};
use crate::similarity::{is_content_link, normalize_url, url_similarity};
use crate::traits::completion::CompletionService;
use crate::traits::page::PageProvider;
use crate::types::analysis::{ContainerAnalysis, DetailSelectors, PaginationAnalysis};
use crate::types::config::PlannerConfig;
use crate::types::lifecycle::PlanStatus;
use crate::types::page::PageSnapshot;
use crate::types::plan::{PlanId, ScrapingPlan};
use crate::workflow::engine::{
    StepError, Workflow, WorkflowContext, WorkflowEngine, WorkflowHandle, WorkflowStep,
};

pub const WORKFLOW_NAME: &str = "plan-generation";

/// Step ids, also the context keys of their outputs.
pub mod steps {
    pub const LOAD_PAGE: &str = "load_page";
    pub const ANALYZE_CONTAINER: &str = "analyze_container";
    pub const ANALYZE_PAGINATION: &str = "analyze_pagination";
    pub const SYNTHESIZE_PLAN: &str = "synthesize_plan";
    pub const PERSIST_PLAN: &str = "persist_plan";
}

/// Auto-suggested example URLs are capped at this many.
const MAX_SUGGESTED_EXAMPLES: usize = 3;

/// Content links need this many similar siblings to be suggested.
const MIN_SIMILAR_SIBLINGS: usize = 2;

const ACTOR: &str = "plan-generation";

/// Request to generate a plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanGenerationRequest {
    pub entry_url: String,

    /// Known item URLs on the entry page; suggested from the page when empty
    #[serde(default)]
    pub example_urls: Vec<String>,

    #[serde(default)]
    pub detail_selectors: DetailSelectors,

    #[serde(default)]
    pub options: SynthesisOptions,

    /// Move the new draft straight to `pending_review`
    #[serde(default)]
    pub submit_for_review: bool,

    /// Detail page used to validate `detail_selectors`
    #[serde(default)]
    pub detail_page_url: Option<String>,
}

impl PlanGenerationRequest {
    pub fn new(entry_url: impl Into<String>) -> Self {
        Self {
            entry_url: entry_url.into(),
            ..Default::default()
        }
    }

    pub fn with_example(mut self, url: impl Into<String>) -> Self {
        self.example_urls.push(url.into());
        self
    }

    pub fn with_detail_selectors(mut self, selectors: DetailSelectors) -> Self {
        self.detail_selectors = selectors;
        self
    }

    pub fn with_options(mut self, options: SynthesisOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_detail_page(mut self, url: impl Into<String>) -> Self {
        self.detail_page_url = Some(url.into());
        self
    }

    pub fn submitted_for_review(mut self) -> Self {
        self.submit_for_review = true;
        self
    }
}

/// Output of the `load_page` step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadedPages {
    pub list: PageSnapshot,
    #[serde(default)]
    pub detail: Option<PageSnapshot>,
}

/// Output of the `persist_plan` step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedPlan {
    pub plan_id: PlanId,
    pub status: PlanStatus,
}

/// Result of a finished generation run.
#[derive(Debug, Clone)]
pub struct GeneratedPlan {
    pub workflow_id: String,
    pub plan: ScrapingPlan,
    pub status: PlanStatus,
    pub container: ContainerAnalysis,
    pub pagination: PaginationAnalysis,
}

type AnalysisCache = TtlCache<(String, String), ContainerAnalysis>;

/// Collaborators shared by all steps.
struct Deps {
    pages: Arc<dyn PageProvider>,
    container: ContainerResolver,
    pagination: PaginationResolver,
    synthesizer: PlanSynthesizer,
    lifecycle: PlanLifecycle,
    cache: AnalysisCache,
    config: PlannerConfig,
}

fn to_value<T: Serialize>(value: &T) -> std::result::Result<Value, StepError> {
    Ok(serde_json::to_value(value)?)
}

/// Pick example URLs from the page itself.
///
/// A content link qualifies when at least two other content links on the
/// page are similar to it; the first three in document order are used.
pub fn suggest_example_urls(page: &PageSnapshot, config: &PlannerConfig) -> Vec<String> {
    let dom = Dom::parse(&page.html, &page.url);
    let mut seen = HashSet::new();
    let candidates: Vec<String> = dom
        .anchors()
        .into_iter()
        .filter(|a| is_content_link(&a.href, &a.text))
        .filter(|a| seen.insert(normalize_url(&a.href)))
        .map(|a| a.href)
        .collect();

    candidates
        .iter()
        .filter(|url| {
            candidates
                .iter()
                .filter(|other| other != url)
                .filter(|other| url_similarity(url, other) >= config.similarity_threshold)
                .count()
                >= MIN_SIMILAR_SIBLINGS
        })
        .take(MAX_SUGGESTED_EXAMPLES)
        .cloned()
        .collect()
}

/// Highest confidence wins; ties go to the analysis with more content links.
fn best_analysis(analyses: Vec<ContainerAnalysis>) -> Option<ContainerAnalysis> {
    let mut best: Option<ContainerAnalysis> = None;
    for analysis in analyses {
        let better = match &best {
            None => true,
            Some(current) => {
                analysis.confidence > current.confidence
                    || (analysis.confidence == current.confidence
                        && analysis.content_links.len() > current.content_links.len())
            }
        };
        if better {
            best = Some(analysis);
        }
    }
    best
}

// =============================================================================
// Steps
// =============================================================================

struct LoadPage(Arc<Deps>);

#[async_trait]
impl WorkflowStep for LoadPage {
    fn id(&self) -> &'static str {
        steps::LOAD_PAGE
    }

    async fn run(&self, ctx: &WorkflowContext) -> std::result::Result<Value, StepError> {
        let request: PlanGenerationRequest = ctx.input()?;
        let list = self.0.pages.snapshot(&request.entry_url).await?;

        let detail = match &request.detail_page_url {
            Some(url) => match self.0.pages.snapshot(url).await {
                Ok(page) => Some(page),
                Err(e) => {
                    warn!(url = %url, error = %e, "Detail page unavailable, skipping detail validation");
                    None
                }
            },
            None => None,
        };

        debug!(url = %list.url, bytes = list.html.len(), "List page loaded");
        to_value(&LoadedPages { list, detail })
    }
}

struct AnalyzeContainer(Arc<Deps>);

impl AnalyzeContainer {
    async fn analyze(&self, page: &PageSnapshot, example_url: &str) -> ContainerAnalysis {
        let key = (page.content_hash(), example_url.to_string());
        if let Some(cached) = self.0.cache.get(&key) {
            debug!(example_url = %example_url, "Container analysis cache hit");
            return cached;
        }
        let analysis = self.0.container.resolve(page, example_url).await;
        self.0.cache.insert(key, analysis.clone());
        analysis
    }
}

#[async_trait]
impl WorkflowStep for AnalyzeContainer {
    fn id(&self) -> &'static str {
        steps::ANALYZE_CONTAINER
    }

    async fn run(&self, ctx: &WorkflowContext) -> std::result::Result<Value, StepError> {
        let request: PlanGenerationRequest = ctx.input()?;
        let pages: LoadedPages = ctx.get(steps::LOAD_PAGE)?;

        let examples = if request.example_urls.is_empty() {
            let suggested = suggest_example_urls(&pages.list, &self.0.config);
            info!(
                url = %pages.list.url,
                suggested = suggested.len(),
                "No example URLs given, using suggestions"
            );
            suggested
        } else {
            request.example_urls.clone()
        };

        let analyses = join_all(examples.iter().map(|url| self.analyze(&pages.list, url))).await;
        let analysis = best_analysis(analyses)
            .unwrap_or_else(|| ContainerAnalysis::none("no example URLs to analyze"));

        info!(
            container = %analysis.container_selector,
            method = %analysis.method,
            confidence = analysis.confidence,
            examples = examples.len(),
            "Container resolved"
        );
        to_value(&analysis)
    }
}

struct AnalyzePagination(Arc<Deps>);

#[async_trait]
impl WorkflowStep for AnalyzePagination {
    fn id(&self) -> &'static str {
        steps::ANALYZE_PAGINATION
    }

    async fn run(&self, ctx: &WorkflowContext) -> std::result::Result<Value, StepError> {
        let pages: LoadedPages = ctx.get(steps::LOAD_PAGE)?;
        let container: ContainerAnalysis = ctx.get(steps::ANALYZE_CONTAINER)?;

        let scope = container
            .is_resolved()
            .then_some(container.container_selector.as_str());
        let analysis = self.0.pagination.resolve(&pages.list, scope).await;

        info!(
            next = analysis.next_selector.as_deref().unwrap_or("-"),
            method = %analysis.method,
            confidence = analysis.confidence,
            "Pagination resolved"
        );
        to_value(&analysis)
    }
}

struct SynthesizePlan(Arc<Deps>);

#[async_trait]
impl WorkflowStep for SynthesizePlan {
    fn id(&self) -> &'static str {
        steps::SYNTHESIZE_PLAN
    }

    async fn run(&self, ctx: &WorkflowContext) -> std::result::Result<Value, StepError> {
        let request: PlanGenerationRequest = ctx.input()?;
        let pages: LoadedPages = ctx.get(steps::LOAD_PAGE)?;
        let container: ContainerAnalysis = ctx.get(steps::ANALYZE_CONTAINER)?;
        let pagination: PaginationAnalysis = ctx.get(steps::ANALYZE_PAGINATION)?;

        let mut plan = self.0.synthesizer.synthesize(
            &request.entry_url,
            &container,
            &pagination,
            &request.detail_selectors,
            &request.options,
        );

        for issue in validate_plan(&plan, &pages.list, pages.detail.as_ref()) {
            if !plan.metadata.warnings.contains(&issue) {
                plan.metadata.warnings.push(issue);
            }
        }

        to_value(&plan)
    }
}

struct PersistPlan(Arc<Deps>);

#[async_trait]
impl WorkflowStep for PersistPlan {
    fn id(&self) -> &'static str {
        steps::PERSIST_PLAN
    }

    async fn run(&self, ctx: &WorkflowContext) -> std::result::Result<Value, StepError> {
        let request: PlanGenerationRequest = ctx.input()?;
        let plan: ScrapingPlan = ctx.get(steps::SYNTHESIZE_PLAN)?;

        let mut status = self.0.lifecycle.create_draft(&plan, Some(ACTOR)).await?;
        if request.submit_for_review {
            status = self
                .0
                .lifecycle
                .submit_for_review(plan.plan_id, Some(ACTOR))
                .await?;
        }

        to_value(&PersistedPlan {
            plan_id: plan.plan_id,
            status: status.status,
        })
    }
}

// =============================================================================
// Generator
// =============================================================================

/// Runs the plan generation workflow on a shared engine.
pub struct PlanGenerator {
    deps: Arc<Deps>,
    engine: WorkflowEngine,
}

impl PlanGenerator {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        pages: Arc<dyn PageProvider>,
        lifecycle: PlanLifecycle,
        clock: Arc<dyn Clock>,
        config: PlannerConfig,
    ) -> Self {
        let deps = Deps {
            pages,
            container: ContainerResolver::new(completion.clone(), config.clone()),
            pagination: PaginationResolver::new(completion, config.clone()),
            synthesizer: PlanSynthesizer::new(clock.clone()),
            lifecycle,
            cache: TtlCache::new(config.analysis_cache_ttl(), clock.clone()),
            config: config.clone(),
        };
        Self {
            deps: Arc::new(deps),
            engine: WorkflowEngine::new(clock, config.workflow_retention()),
        }
    }

    /// The engine holding this generator's workflow records.
    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub fn lifecycle(&self) -> &PlanLifecycle {
        &self.deps.lifecycle
    }

    /// The five-step workflow.
    pub fn workflow(&self) -> Workflow {
        Workflow::new(WORKFLOW_NAME)
            .step(LoadPage(self.deps.clone()))
            .step(AnalyzeContainer(self.deps.clone()))
            .step(AnalyzePagination(self.deps.clone()))
            .step(SynthesizePlan(self.deps.clone()))
            .step(PersistPlan(self.deps.clone()))
    }

    /// Start a generation run without waiting for it.
    pub fn start(&self, request: &PlanGenerationRequest) -> Result<WorkflowHandle> {
        let input = serde_json::to_value(request)?;
        Ok(self.engine.start(self.workflow(), input))
    }

    /// Generate, persist and return a plan.
    pub async fn generate(&self, request: &PlanGenerationRequest) -> Result<GeneratedPlan> {
        info!(
            entry_url = %request.entry_url,
            examples = request.example_urls.len(),
            "Starting plan generation"
        );

        let handle = self.start(request)?;
        let workflow_id = handle.workflow_id.clone();
        let ctx = handle.wait().await?;

        let plan: ScrapingPlan = ctx.get(steps::SYNTHESIZE_PLAN)?;
        let persisted: PersistedPlan = ctx.get(steps::PERSIST_PLAN)?;
        let container: ContainerAnalysis = ctx.get(steps::ANALYZE_CONTAINER)?;
        let pagination: PaginationAnalysis = ctx.get(steps::ANALYZE_PAGINATION)?;

        if plan.needs_review() {
            warn!(
                plan_id = %plan.plan_id,
                confidence = plan.confidence_score,
                "Generated plan needs human review"
            );
        }
        info!(
            plan_id = %plan.plan_id,
            workflow_id = %workflow_id,
            confidence = plan.confidence_score,
            "Plan generated"
        );

        Ok(GeneratedPlan {
            workflow_id,
            plan,
            status: persisted.status,
            container,
            pagination,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkflowError;
    use crate::stores::MemoryStore;
    use crate::testing::{fixtures, ManualClock, MockCompletion, StaticPageProvider};
    use crate::types::analysis::ContainerMethod;
    use crate::workflow::engine::StepStatus;

    const ENTRY: &str = "https://example.com/news";

    fn generator(completion: Arc<MockCompletion>, pages: StaticPageProvider) -> PlanGenerator {
        let clock: Arc<ManualClock> = Arc::new(ManualClock::default());
        let config = PlannerConfig::default();
        let lifecycle = PlanLifecycle::new(Arc::new(MemoryStore::new()), clock.clone(), config.clone());
        PlanGenerator::new(completion, Arc::new(pages), lifecycle, clock, config)
    }

    fn news_site() -> StaticPageProvider {
        StaticPageProvider::new().with_page(ENTRY, fixtures::NEWS_LIST_PAGE)
    }

    #[tokio::test]
    async fn test_generates_and_persists_draft() {
        let generator = generator(Arc::new(MockCompletion::failing()), news_site());
        let request = PlanGenerationRequest::new(ENTRY).with_example("https://example.com/a1.htm");

        let generated = generator.generate(&request).await.unwrap();
        assert_eq!(generated.plan.list_selector, "ul.news-list");
        assert_eq!(generated.status, PlanStatus::Draft);
        assert_eq!(generated.container.content_links.len(), 5);

        let stored = generator
            .lifecycle()
            .current_plan(generated.plan.plan_id)
            .await
            .unwrap();
        assert_eq!(stored, generated.plan);

        let state = generator.engine().state(&generated.workflow_id).unwrap();
        assert!(state
            .steps
            .iter()
            .all(|s| s.status == StepStatus::Completed));
    }

    #[tokio::test]
    async fn test_examples_are_suggested_when_missing() {
        let page = PageSnapshot::new(ENTRY, fixtures::NEWS_LIST_PAGE);
        let suggested = suggest_example_urls(&page, &PlannerConfig::default());
        assert_eq!(
            suggested,
            vec![
                "https://example.com/a1.htm",
                "https://example.com/a2.htm",
                "https://example.com/a3.htm",
            ]
        );

        let generator = generator(Arc::new(MockCompletion::failing()), news_site());
        let generated = generator
            .generate(&PlanGenerationRequest::new(ENTRY).submitted_for_review())
            .await
            .unwrap();
        assert_eq!(generated.plan.list_selector, "ul.news-list");
        assert_eq!(generated.status, PlanStatus::PendingReview);
    }

    #[tokio::test]
    async fn test_missing_page_fails_first_step() {
        let generator = generator(Arc::new(MockCompletion::failing()), StaticPageProvider::new());
        let handle = generator.start(&PlanGenerationRequest::new(ENTRY)).unwrap();
        let workflow_id = handle.workflow_id.clone();

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, WorkflowError::StepFailed { ref step_id, .. } if step_id == steps::LOAD_PAGE));

        let state = generator.engine().state(&workflow_id).unwrap();
        assert_eq!(state.step(steps::LOAD_PAGE).unwrap().status, StepStatus::Failed);
        assert_eq!(
            state.step(steps::PERSIST_PLAN).unwrap().status,
            StepStatus::Skipped
        );
    }

    #[tokio::test]
    async fn test_container_analyses_are_cached() {
        let completion = Arc::new(MockCompletion::failing());
        let generator = generator(completion.clone(), news_site());
        let request = PlanGenerationRequest::new(ENTRY).with_example("https://example.com/a1.htm");

        generator.generate(&request).await.unwrap();
        let first = completion.call_count();
        generator.generate(&request).await.unwrap();
        let second = completion.call_count() - first;

        assert!(second < first, "first run {} calls, second {}", first, second);
    }

    #[test]
    fn test_best_analysis_prefers_confidence_then_links() {
        let mut low = ContainerAnalysis::none("low");
        low.method = ContainerMethod::Heuristic;
        low.container_selector = "div.a".to_string();
        low.confidence = 0.6;
        low.content_links = vec!["x".to_string(); 4];

        let mut wide = low.clone();
        wide.container_selector = "div.b".to_string();
        wide.content_links = vec!["x".to_string(); 9];

        let mut sure = low.clone();
        sure.container_selector = "div.c".to_string();
        sure.confidence = 0.9;

        let best = best_analysis(vec![low.clone(), wide.clone()]).unwrap();
        assert_eq!(best.container_selector, "div.b");

        let best = best_analysis(vec![low, wide, sure]).unwrap();
        assert_eq!(best.container_selector, "div.c");

        assert!(best_analysis(Vec::new()).is_none());
    }
}
