//! Integration tests for the plan lifecycle.
//!
//! Covers versioning, review, concurrent writers and background execution
//! against the in-memory store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio_test::{assert_err, assert_ok};

use scrape_planner::{
    error::StoreResult,
    testing::{fixtures, ManualClock, MockExecutor},
    ExecutionStatus, KeyValueStore, LifecycleError, MemoryStore, PlanLifecycle, PlanModification,
    PlanStatus, PlannerConfig, ScrapingPlan, StoreError,
};

/// In-memory store whose armed writes fail once for keys with a given prefix.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_cas: Mutex<Option<&'static str>>,
    fail_write: Mutex<Option<&'static str>>,
}

impl FlakyStore {
    fn fail_next_cas(&self, prefix: &'static str) {
        *self.fail_cas.lock().unwrap() = Some(prefix);
    }

    fn fail_next_write(&self, prefix: &'static str) {
        *self.fail_write.lock().unwrap() = Some(prefix);
    }

    fn trip(slot: &Mutex<Option<&'static str>>, key: &str) -> StoreResult<()> {
        let mut armed = slot.lock().unwrap();
        if armed.is_some_and(|prefix| key.starts_with(prefix)) {
            *armed = None;
            return Err(StoreError::Backend("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.inner.hget(key, field).await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        Self::trip(&self.fail_write, key)?;
        self.inner.hset(key, field, value).await
    }

    async fn hset_if(
        &self,
        key: &str,
        field: &str,
        expected: Option<&str>,
        value: &str,
    ) -> StoreResult<bool> {
        Self::trip(&self.fail_cas, key)?;
        self.inner.hset_if(key, field, expected, value).await
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.inner.hgetall(key).await
    }

    async fn lpush(&self, key: &str, value: &str) -> StoreResult<usize> {
        self.inner.lpush(key, value).await
    }

    async fn ltrim(&self, key: &str, keep: usize) -> StoreResult<()> {
        self.inner.ltrim(key, keep).await
    }

    async fn lrange(&self, key: &str, limit: usize) -> StoreResult<Vec<String>> {
        self.inner.lrange(key, limit).await
    }
}

fn flaky_lifecycle() -> (PlanLifecycle, Arc<FlakyStore>, Arc<ManualClock>) {
    let store = Arc::new(FlakyStore::default());
    let clock = Arc::new(ManualClock::default());
    let lifecycle = PlanLifecycle::new(store.clone(), clock.clone(), PlannerConfig::default());
    (lifecycle, store, clock)
}

fn lifecycle() -> PlanLifecycle {
    PlanLifecycle::new(
        Arc::new(MemoryStore::new()),
        Arc::new(ManualClock::default()),
        PlannerConfig::default(),
    )
}

fn news_plan() -> ScrapingPlan {
    fixtures::plan("https://example.com/news", "ul.news-list", "ul.news-list > li > a")
}

async fn approved(lc: &PlanLifecycle, plan: &ScrapingPlan) {
    assert_ok!(lc.create_draft(plan, Some("planner")).await);
    assert_ok!(lc.submit_for_review(plan.plan_id, None).await);
    assert_ok!(lc.approve(plan.plan_id, plan.version, "reviewer", None).await);
}

#[tokio::test]
async fn test_modification_keeps_prior_version_unchanged() {
    let lc = lifecycle();
    let plan = news_plan();
    approved(&lc, &plan).await;

    let mut expected = 1;
    for selector in ["div.teasers", "section.news", "ol.items"] {
        let revised = lc
            .modify(
                plan.plan_id,
                expected,
                &PlanModification::new().with_list_selector(selector),
            )
            .await
            .unwrap();
        assert_eq!(revised.plan_id, plan.plan_id);
        assert_eq!(revised.version, expected + 1);
        expected = revised.version;
    }

    let versions = lc.versions(plan.plan_id).await.unwrap();
    let numbers: Vec<u32> = versions.iter().map(|p| p.version).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
    assert_eq!(versions[0], plan);
    assert_eq!(versions[3].list_selector, "ol.items");
}

#[tokio::test]
async fn test_approval_is_per_version() {
    let lc = lifecycle();
    let plan = news_plan();
    approved(&lc, &plan).await;

    lc.modify(
        plan.plan_id,
        1,
        &PlanModification::new().with_pagination_selector(Some("a.next".to_string())),
    )
    .await
    .unwrap();

    // the new draft cannot run until version 2 is reviewed
    let err = lc
        .execute(plan.plan_id, Arc::new(MockExecutor::succeeding(1)), None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, LifecycleError::InvalidTransition { .. }));

    // approving the stale version is a conflict
    lc.submit_for_review(plan.plan_id, None).await.unwrap();
    let err = lc.approve(plan.plan_id, 1, "reviewer", None).await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::VersionConflict { expected: 1, actual: 2, .. }
    ));

    let status = lc.approve(plan.plan_id, 2, "reviewer", None).await.unwrap();
    assert!(status.is_current_version_approved());
    assert_eq!(status.approvals.len(), 2);
}

#[tokio::test]
async fn test_concurrent_modifications_do_not_lose_updates() {
    let lc = lifecycle();
    let plan = news_plan();
    assert_ok!(lc.create_draft(&plan, None).await);

    let attempts = (0..8).map(|i| {
        let lc = lc.clone();
        let plan_id = plan.plan_id;
        tokio::spawn(async move {
            lc.modify(
                plan_id,
                1,
                &PlanModification::new().with_list_selector(format!("div.variant-{}", i)),
            )
            .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners: Vec<&ScrapingPlan> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for result in &results {
        if let Err(e) = result {
            assert!(
                matches!(
                    e,
                    LifecycleError::VersionConflict { .. } | LifecycleError::Contention { .. }
                ),
                "unexpected error: {}",
                e
            );
        }
    }

    let status = lc.status(plan.plan_id).await.unwrap();
    assert_eq!(status.current_version, 2);
    let current = lc.current_plan(plan.plan_id).await.unwrap();
    assert_eq!(current.list_selector, winners[0].list_selector);
}

#[tokio::test]
async fn test_execution_history_and_audit_trail() {
    let lc = lifecycle();
    let plan = news_plan();
    approved(&lc, &plan).await;

    let executor = Arc::new(MockExecutor::succeeding(3));
    for _ in 0..2 {
        let handle = lc.execute(plan.plan_id, executor.clone(), Some("cron")).await.unwrap();
        let record = handle.finished().await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert!(record.started_at.is_some());
        assert!(record.finished_at.is_some());
    }

    let status = lc.status(plan.plan_id).await.unwrap();
    assert_eq!(status.status, PlanStatus::Approved);
    assert_eq!(status.execution_history, executor.runs());

    // create, submit, approve, then executing/approved twice
    let trail = lc.audit_trail(plan.plan_id, 100).await.unwrap();
    assert_eq!(trail.len(), 7);
    assert_eq!(trail.last().unwrap().to, PlanStatus::Draft);
}

#[tokio::test]
async fn test_deprecated_plan_rejects_everything() {
    let lc = lifecycle();
    let plan = news_plan();
    approved(&lc, &plan).await;
    assert_ok!(lc.deprecate(plan.plan_id, Some("admin"), Some("site relaunched")).await);

    assert_err!(lc.deprecate(plan.plan_id, None, None).await);
    assert!(lc
        .execute(plan.plan_id, Arc::new(MockExecutor::succeeding(1)), None)
        .await
        .is_err());
    assert_err!(
        lc.modify(
            plan.plan_id,
            1,
            &PlanModification::new().with_list_selector("div.x")
        )
        .await
    );
}

#[tokio::test]
async fn test_invalid_schedule_is_rejected_on_modify() {
    let lc = lifecycle();
    let plan = news_plan();
    assert_ok!(lc.create_draft(&plan, None).await);

    let err = lc
        .modify(
            plan.plan_id,
            1,
            &PlanModification::new().with_schedule(Some("60 * * * *".to_string())),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Schedule(_)));
    assert_eq!(lc.status(plan.plan_id).await.unwrap().current_version, 1);
}

#[tokio::test]
async fn test_modification_retries_after_failed_status_write() {
    let (lc, store, _) = flaky_lifecycle();
    let plan = news_plan();
    assert_ok!(lc.create_draft(&plan, None).await);

    let edit = PlanModification::new().with_list_selector("div.teasers");
    store.fail_next_cas("plan_status:");
    let err = lc.modify(plan.plan_id, 1, &edit).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Store(_)));
    assert_eq!(lc.status(plan.plan_id).await.unwrap().current_version, 1);

    let revised = lc.modify(plan.plan_id, 1, &edit).await.unwrap();
    assert_eq!(revised.version, 2);
    assert_eq!(lc.current_plan(plan.plan_id).await.unwrap(), revised);
}

#[tokio::test]
async fn test_unreferenced_version_is_replaced_once_stale() {
    let (lc, store, clock) = flaky_lifecycle();
    let plan = news_plan();
    assert_ok!(lc.create_draft(&plan, None).await);

    store.fail_next_cas("plan_status:");
    assert_err!(
        lc.modify(
            plan.plan_id,
            1,
            &PlanModification::new().with_list_selector("div.teasers")
        )
        .await
    );

    // a different edit waits until the leftover record is old enough
    let other = PlanModification::new().with_list_selector("section.news");
    let err = lc.modify(plan.plan_id, 1, &other).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Contention { .. }));

    clock.advance(Duration::from_secs(61));
    let revised = lc.modify(plan.plan_id, 1, &other).await.unwrap();
    assert_eq!(revised.version, 2);
    assert_eq!(
        lc.get_plan(plan.plan_id, 2).await.unwrap().list_selector,
        "section.news"
    );
}

#[tokio::test]
async fn test_failed_queue_write_leaves_plan_executable() {
    let (lc, store, _) = flaky_lifecycle();
    let plan = news_plan();
    approved(&lc, &plan).await;

    store.fail_next_write("execution:");
    let err = lc
        .execute(plan.plan_id, Arc::new(MockExecutor::succeeding(2)), None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, LifecycleError::Store(_)));

    let status = lc.status(plan.plan_id).await.unwrap();
    assert_eq!(status.status, PlanStatus::Approved);
    assert!(status.execution_history.is_empty());

    let handle = lc
        .execute(plan.plan_id, Arc::new(MockExecutor::succeeding(2)), None)
        .await
        .unwrap();
    let record = handle.finished().await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.items_extracted, Some(2));
}
