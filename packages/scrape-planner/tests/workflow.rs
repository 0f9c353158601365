//! Integration tests for the workflow engine and plan generation.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scrape_planner::{
    testing::{fixtures, ManualClock, MockCompletion, StaticPageProvider},
    workflow::{StepError, StepStatus, WorkflowContext},
    DetailSelectors, IssueSeverity, MemoryStore, PlanGenerationRequest, PlanGenerator,
    PlanLifecycle, PlanStatus, PlannerConfig, SynthesisOptions, Workflow, WorkflowEngine,
    WorkflowError, WorkflowStatus, WorkflowStep,
};

const ENTRY: &str = "https://example.com/news";
const DETAIL: &str = "https://example.com/a1.htm";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Records the status of every step of its workflow when it runs.
struct Probe {
    id: &'static str,
    engine: Arc<Mutex<Option<(WorkflowEngine, String)>>>,
    seen: Arc<Mutex<Vec<(String, Vec<StepStatus>)>>>,
}

#[async_trait]
impl WorkflowStep for Probe {
    fn id(&self) -> &'static str {
        self.id
    }

    async fn run(&self, _ctx: &WorkflowContext) -> Result<Value, StepError> {
        // the workflow id is published right after start; let the test catch up
        tokio::task::yield_now().await;
        let target = self.engine.lock().unwrap().clone();
        if let Some((engine, workflow_id)) = target {
            if let Some(state) = engine.state(&workflow_id) {
                let statuses = state.steps.iter().map(|s| s.status).collect();
                self.seen.lock().unwrap().push((self.id.to_string(), statuses));
            }
        }
        Ok(json!(self.id))
    }
}

#[tokio::test]
async fn test_later_steps_never_run_before_earlier_ones_finish() {
    let engine = WorkflowEngine::new(Arc::new(ManualClock::default()), Duration::from_secs(60));
    let target = Arc::new(Mutex::new(None));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut workflow = Workflow::new("ordering");
    for id in ["a", "b", "c", "d"] {
        workflow = workflow.step(Probe {
            id,
            engine: target.clone(),
            seen: seen.clone(),
        });
    }

    let handle = engine.start(workflow, json!({}));
    *target.lock().unwrap() = Some((engine.clone(), handle.workflow_id.clone()));
    let ctx = handle.wait().await.unwrap();
    assert_eq!(ctx.get::<String>("d").unwrap(), "d");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    for (index, (_, statuses)) in seen.iter().enumerate() {
        assert_eq!(statuses[index], StepStatus::Running);
        assert!(statuses[..index].iter().all(|s| *s == StepStatus::Completed));
        assert!(statuses[index + 1..].iter().all(|s| *s == StepStatus::Pending));
    }
}

#[tokio::test]
async fn test_failed_workflow_is_inspectable_until_retention_passes() {
    struct Boom;

    #[async_trait]
    impl WorkflowStep for Boom {
        fn id(&self) -> &'static str {
            "boom"
        }

        async fn run(&self, _ctx: &WorkflowContext) -> Result<Value, StepError> {
            Err("adapter exploded".into())
        }
    }

    let clock = Arc::new(ManualClock::default());
    let engine = WorkflowEngine::new(clock.clone(), Duration::from_secs(60));
    let handle = engine.start(Workflow::new("doomed").step(Boom), json!(null));
    let workflow_id = handle.workflow_id.clone();

    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, WorkflowError::StepFailed { .. }));

    let state = engine.state(&workflow_id).unwrap();
    assert_eq!(state.status, WorkflowStatus::Failed);
    assert_eq!(state.steps[0].error.as_deref(), Some("adapter exploded"));

    clock.advance(Duration::from_secs(61));
    assert!(engine.state(&workflow_id).is_none());
}

#[tokio::test]
async fn test_generation_validates_against_detail_page() {
    init_tracing();

    let pages = StaticPageProvider::new()
        .with_page(ENTRY, fixtures::NEWS_LIST_PAGE)
        .with_page(
            DETAIL,
            "<html><body><h1>Title 1</h1><div class='text'>Body</div></body></html>",
        );
    let clock: Arc<ManualClock> = Arc::new(ManualClock::default());
    let config = PlannerConfig::default();
    let lifecycle = PlanLifecycle::new(Arc::new(MemoryStore::new()), clock.clone(), config.clone());
    let generator = PlanGenerator::new(
        Arc::new(MockCompletion::failing()),
        Arc::new(pages),
        lifecycle,
        clock,
        config,
    );

    let request = PlanGenerationRequest::new(ENTRY)
        .with_example("/a1.htm")
        .with_detail_page(DETAIL)
        .with_detail_selectors(
            DetailSelectors::new()
                .with_field("title", "h1")
                .with_field("published", "time.date")
                .with_confidence(0.4),
        )
        .with_options(
            SynthesisOptions::new()
                .with_name("Gemeinde news")
                .with_schedule("0 6 * * MON-FRI")
                .with_tag("municipal"),
        );

    let generated = generator.generate(&request).await.unwrap();
    let plan = &generated.plan;

    assert_eq!(plan.version, 1);
    assert_eq!(plan.list_selector, "ul.news-list");
    assert_eq!(plan.metadata.schedule.as_deref(), Some("0 6 * * MON-FRI"));
    assert!(plan.confidence_score >= 0.6);
    assert!(plan
        .metadata
        .warnings
        .iter()
        .any(|w| w.target == "published" && w.severity == IssueSeverity::Warning));
    assert!(!plan
        .metadata
        .warnings
        .iter()
        .any(|w| w.target == "title"));

    let status = generator.lifecycle().status(plan.plan_id).await.unwrap();
    assert_eq!(status.status, PlanStatus::Draft);
}
