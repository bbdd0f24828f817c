//! Reconciler behavior against the in-memory attribute store.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use seqsync_common::{Attribute, KEY_ATTR, SEQUENCER_ATTR};
use seqsync_reconcile::testing::MemoryAttributeStore;
use seqsync_reconcile::{DisplacedKeyHandler, ReconcileOutcome, Reconciler, RetryPolicy, SequenceKey};

fn reconciler(store: Arc<MemoryAttributeStore>) -> Reconciler<Arc<MemoryAttributeStore>> {
    Reconciler::new(store).with_retry(RetryPolicy::immediate(30))
}

fn seq(token: &str) -> SequenceKey {
    SequenceKey::from_token(token)
}

fn color(value: &str) -> Vec<Attribute> {
    vec![Attribute::replacing("color", value)]
}

/// Records every displaced key it is told about.
#[derive(Default)]
struct RecordingHandler {
    keys: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingHandler {
    fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl DisplacedKeyHandler for RecordingHandler {
    async fn on_displaced(&self, old_key: &str) -> Result<()> {
        self.keys.lock().unwrap().push(old_key.to_string());
        if self.fail {
            anyhow::bail!("handler failure");
        }
        Ok(())
    }
}

// =========================================================================
// apply_update
// =========================================================================

#[tokio::test]
async fn first_update_creates_record() {
    let store = Arc::new(MemoryAttributeStore::new());
    let r = reconciler(store.clone());

    let outcome = r.apply_update(&seq("00001 k1"), "rec-1", &color("red")).await;

    assert_eq!(outcome, ReconcileOutcome::Created);
    assert!(outcome.succeeded());
    assert_eq!(store.value("rec-1", SEQUENCER_ATTR).as_deref(), Some("00001 k1"));
    assert_eq!(store.value("rec-1", KEY_ATTR).as_deref(), Some("k1"));
    assert_eq!(store.value("rec-1", "color").as_deref(), Some("red"));
}

#[tokio::test]
async fn rename_invokes_displaced_callback_and_updates() {
    let store = Arc::new(MemoryAttributeStore::new());
    let r = reconciler(store.clone());
    let handler = RecordingHandler::default();

    r.apply_update(&seq("00001 k1"), "rec-1", &color("red")).await;
    let outcome = r
        .apply_update_with(&seq("00002 k2"), "rec-1", &color("blue"), &handler)
        .await;

    assert_eq!(outcome, ReconcileOutcome::Updated);
    assert_eq!(handler.keys(), vec!["k1".to_string()]);
    assert_eq!(store.value("rec-1", "color").as_deref(), Some("blue"));
    assert_eq!(store.value("rec-1", KEY_ATTR).as_deref(), Some("k2"));
    assert_eq!(store.value("rec-1", SEQUENCER_ATTR).as_deref(), Some("00002 k2"));
}

#[tokio::test]
async fn same_key_update_does_not_invoke_callback() {
    let store = Arc::new(MemoryAttributeStore::new());
    let r = reconciler(store.clone());
    let handler = RecordingHandler::default();

    r.apply_update(&seq("1 k"), "rec-1", &color("red")).await;
    r.apply_update_with(&seq("2 k"), "rec-1", &color("blue"), &handler)
        .await;

    assert!(handler.keys().is_empty());
}

#[tokio::test]
async fn failing_callback_does_not_block_commit() {
    let store = Arc::new(MemoryAttributeStore::new());
    let r = reconciler(store.clone());
    let handler = RecordingHandler {
        fail: true,
        ..Default::default()
    };

    r.apply_update(&seq("1 old"), "rec-1", &color("red")).await;
    let outcome = r
        .apply_update_with(&seq("2 new"), "rec-1", &color("blue"), &handler)
        .await;

    assert_eq!(outcome, ReconcileOutcome::Updated);
    assert_eq!(store.value("rec-1", KEY_ATTR).as_deref(), Some("new"));
}

#[tokio::test]
async fn out_of_order_update_is_stale() {
    let store = Arc::new(MemoryAttributeStore::new());
    let r = reconciler(store.clone());

    assert!(r.apply_update(&seq("5 k"), "rec-1", &color("new")).await.succeeded());
    let outcome = r.apply_update(&seq("3 k"), "rec-1", &color("old")).await;

    assert_eq!(outcome, ReconcileOutcome::Stale);
    assert!(!outcome.succeeded());
    assert_eq!(store.value("rec-1", SEQUENCER_ATTR).as_deref(), Some("5 k"));
    assert_eq!(store.value("rec-1", "color").as_deref(), Some("new"));
}

#[tokio::test]
async fn wider_sequencer_is_newer() {
    let store = Arc::new(MemoryAttributeStore::new());
    let r = reconciler(store.clone());

    r.apply_update(&seq("9 k"), "rec-1", &color("a")).await;
    let outcome = r.apply_update(&seq("10 k"), "rec-1", &color("b")).await;

    assert_eq!(outcome, ReconcileOutcome::Updated);
    assert_eq!(store.value("rec-1", SEQUENCER_ATTR).as_deref(), Some("10 k"));
}

#[tokio::test]
async fn duplicate_delivery_is_a_no_op_success() {
    let store = Arc::new(MemoryAttributeStore::new());
    let r = reconciler(store.clone());

    r.apply_update(&seq("5 k"), "rec-1", &color("red")).await;
    let writes_after_first = store.writes();
    let outcome = r.apply_update(&seq("5 k"), "rec-1", &color("red")).await;

    assert_eq!(outcome, ReconcileOutcome::AlreadyCurrent);
    assert!(outcome.succeeded());
    assert_eq!(store.writes(), writes_after_first);
    assert_eq!(store.value("rec-1", SEQUENCER_ATTR).as_deref(), Some("5 k"));
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let store = Arc::new(MemoryAttributeStore::new());
    let r = reconciler(store.clone());
    store.fail_next(3);

    let outcome = r.apply_update(&seq("1 k"), "rec-1", &color("red")).await;

    assert_eq!(outcome, ReconcileOutcome::Created);
    assert_eq!(store.value("rec-1", "color").as_deref(), Some("red"));
}

#[tokio::test]
async fn exhausted_budget_abandons_update() {
    let store = Arc::new(MemoryAttributeStore::new());
    let r = Reconciler::new(store.clone()).with_retry(RetryPolicy::immediate(4));
    store.fail_next(100);

    let outcome = r.apply_update(&seq("1 k"), "rec-1", &color("red")).await;

    assert_eq!(outcome, ReconcileOutcome::Exhausted { attempts: 4 });
    assert!(!outcome.succeeded());
    store.fail_next(0);
    assert!(!store.contains("rec-1"));
}

#[tokio::test]
async fn zero_attempt_policy_still_tries_once() {
    let store = Arc::new(MemoryAttributeStore::new());
    let r = Reconciler::new(store.clone()).with_retry(RetryPolicy::immediate(0));

    let outcome = r.apply_update(&seq("1 k"), "rec-1", &color("red")).await;

    assert_eq!(outcome, ReconcileOutcome::Created);
    assert_eq!(store.value("rec-1", "color").as_deref(), Some("red"));
}

#[tokio::test]
async fn concurrent_updates_converge_on_greater_sequencer() {
    let store = Arc::new(MemoryAttributeStore::new().with_yield_after_read());
    let r = reconciler(store.clone());

    let (seven, twelve) = (seq("00007 k"), seq("00012 k"));
    let (seven_attrs, twelve_attrs) = (color("seven"), color("twelve"));

    let (a, b) = tokio::join!(
        r.apply_update(&seven, "rec-1", &seven_attrs),
        r.apply_update(&twelve, "rec-1", &twelve_attrs),
    );

    // Whichever write lands second lost the race exactly once.
    assert_eq!(store.condition_failures(), 1);
    assert!(b.succeeded());
    assert!(a == ReconcileOutcome::Created || a == ReconcileOutcome::Stale);
    assert_eq!(store.value("rec-1", SEQUENCER_ATTR).as_deref(), Some("00012 k"));
    assert_eq!(store.value("rec-1", "color").as_deref(), Some("twelve"));
}

#[tokio::test]
async fn concurrent_updates_converge_regardless_of_poll_order() {
    let store = Arc::new(MemoryAttributeStore::new().with_yield_after_read());
    let r = reconciler(store.clone());

    let (seven, twelve) = (seq("00007 k"), seq("00012 k"));
    let (seven_attrs, twelve_attrs) = (color("seven"), color("twelve"));

    let (newer, older) = tokio::join!(
        r.apply_update(&twelve, "rec-1", &twelve_attrs),
        r.apply_update(&seven, "rec-1", &seven_attrs),
    );

    assert!(newer.succeeded());
    assert!(older == ReconcileOutcome::Created || older == ReconcileOutcome::Stale);
    assert_eq!(store.condition_failures(), 1);
    assert_eq!(store.value("rec-1", SEQUENCER_ATTR).as_deref(), Some("00012 k"));
}

#[tokio::test]
async fn many_concurrent_updates_keep_the_greatest() {
    let store = Arc::new(MemoryAttributeStore::new().with_yield_after_read());
    let r = reconciler(store.clone());

    let seqs: Vec<SequenceKey> = (1..=10).map(|n| seq(&format!("{n:05} k"))).collect();
    let attrs: Vec<Vec<Attribute>> = (1..=10).map(|n| color(&n.to_string())).collect();

    let outcomes = futures::future::join_all(
        seqs.iter()
            .zip(&attrs)
            .map(|(s, a)| r.apply_update(s, "rec-1", a)),
    )
    .await;

    for outcome in &outcomes {
        assert!(matches!(
            outcome,
            ReconcileOutcome::Created | ReconcileOutcome::Updated | ReconcileOutcome::Stale
        ));
    }
    assert!(outcomes[9].succeeded());
    assert_eq!(store.value("rec-1", SEQUENCER_ATTR).as_deref(), Some("00010 k"));
    assert_eq!(store.value("rec-1", "color").as_deref(), Some("10"));
}

// =========================================================================
// apply_delete
// =========================================================================

#[tokio::test]
async fn delete_of_missing_record_is_a_no_op() {
    let store = Arc::new(MemoryAttributeStore::new());
    let r = reconciler(store.clone());

    let outcome = r.apply_delete("nobody", &seq("1 k")).await;

    assert_eq!(outcome, ReconcileOutcome::Absent);
    assert!(outcome.succeeded());
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn newer_delete_removes_record() {
    let store = Arc::new(MemoryAttributeStore::new());
    let r = reconciler(store.clone());

    r.apply_update(&seq("5 k"), "rec-1", &color("red")).await;
    let outcome = r.apply_delete("rec-1", &seq("6 k")).await;

    assert_eq!(outcome, ReconcileOutcome::Deleted);
    assert!(!store.contains("rec-1"));
}

#[tokio::test]
async fn older_delete_is_rejected() {
    let store = Arc::new(MemoryAttributeStore::new());
    let r = reconciler(store.clone());

    r.apply_update(&seq("5 k"), "rec-1", &color("red")).await;
    let outcome = r.apply_delete("rec-1", &seq("4 k")).await;

    assert_eq!(outcome, ReconcileOutcome::Stale);
    assert!(!outcome.succeeded());
    assert_eq!(store.value("rec-1", "color").as_deref(), Some("red"));
}

#[tokio::test]
async fn delete_for_other_key_is_rejected() {
    let store = Arc::new(MemoryAttributeStore::new());
    let r = reconciler(store.clone());

    r.apply_update(&seq("5 moved-to"), "rec-1", &color("red")).await;
    let outcome = r.apply_delete("rec-1", &seq("9 moved-from")).await;

    assert_eq!(outcome, ReconcileOutcome::Stale);
    assert!(store.contains("rec-1"));
}

#[tokio::test]
async fn delete_retries_through_transient_failures() {
    let store = Arc::new(MemoryAttributeStore::new());
    let r = reconciler(store.clone());

    r.apply_update(&seq("5 k"), "rec-1", &color("red")).await;
    store.fail_next(2);
    let outcome = r.apply_delete("rec-1", &seq("6 k")).await;

    assert_eq!(outcome, ReconcileOutcome::Deleted);
}

#[tokio::test]
async fn exhausted_budget_abandons_delete() {
    let store = Arc::new(MemoryAttributeStore::new());
    let r = Reconciler::new(store.clone()).with_retry(RetryPolicy::immediate(4));
    store.seed("rec-1", &[(SEQUENCER_ATTR, "1 k"), (KEY_ATTR, "k")]);
    store.fail_next(100);

    let outcome = r.apply_delete("rec-1", &seq("2 k")).await;

    assert_eq!(outcome, ReconcileOutcome::Exhausted { attempts: 4 });
    assert!(!outcome.succeeded());
    store.fail_next(0);
    assert_eq!(store.value("rec-1", SEQUENCER_ATTR).as_deref(), Some("1 k"));
}

#[tokio::test]
async fn racing_delete_never_outlives_newer_update() {
    let store = Arc::new(MemoryAttributeStore::new().with_yield_after_read());
    let r = reconciler(store.clone());
    store.seed("rec-1", &[(SEQUENCER_ATTR, "5 k"), (KEY_ATTR, "k")]);

    let (eight, six) = (seq("8 k"), seq("6 k"));
    let attrs = color("eight");

    let (update, delete) = tokio::join!(
        r.apply_update(&eight, "rec-1", &attrs),
        r.apply_delete("rec-1", &six),
    );

    // Either the update commits first and the delete goes stale, or the
    // delete commits first and the update recreates the record.
    assert!(update.succeeded());
    assert!(delete == ReconcileOutcome::Stale || delete == ReconcileOutcome::Deleted);
    assert_eq!(store.value("rec-1", SEQUENCER_ATTR).as_deref(), Some("8 k"));
    assert_eq!(store.value("rec-1", "color").as_deref(), Some("eight"));
}

// =========================================================================
// clear_auxiliary
// =========================================================================

#[tokio::test]
async fn clear_removes_sentinel_but_keeps_record() {
    let store = Arc::new(MemoryAttributeStore::new());
    let r = reconciler(store.clone());

    let attrs = vec![
        Attribute::replacing("color", "red"),
        Attribute::replacing("tag", ""),
    ];
    r.apply_update(&seq("5 k"), "rec-1", &attrs).await;
    let outcome = r.clear_auxiliary("rec-1", &seq("5 k"), "tag").await;

    assert_eq!(outcome, ReconcileOutcome::Cleared);
    assert!(store.values("rec-1", "tag").is_empty());
    assert_eq!(store.value("rec-1", "color").as_deref(), Some("red"));
}

#[tokio::test]
async fn clear_keeps_non_empty_values() {
    let store = Arc::new(MemoryAttributeStore::new());
    let r = reconciler(store.clone());
    store.seed(
        "rec-1",
        &[(SEQUENCER_ATTR, "5 k"), ("tag", ""), ("tag", "important")],
    );

    let outcome = r.clear_auxiliary("rec-1", &seq("5 k"), "tag").await;

    assert_eq!(outcome, ReconcileOutcome::Cleared);
    assert_eq!(store.values("rec-1", "tag"), vec!["important".to_string()]);
}

#[tokio::test]
async fn clear_skips_when_superseded() {
    let store = Arc::new(MemoryAttributeStore::new());
    let r = reconciler(store.clone());
    store.seed("rec-1", &[(SEQUENCER_ATTR, "9 k"), ("tag", "")]);

    let outcome = r.clear_auxiliary("rec-1", &seq("5 k"), "tag").await;

    assert_eq!(outcome, ReconcileOutcome::Stale);
    assert_eq!(store.values("rec-1", "tag"), vec![String::new()]);
}

#[tokio::test]
async fn clear_on_missing_record_is_a_no_op() {
    let store = Arc::new(MemoryAttributeStore::new());
    let r = reconciler(store.clone());

    let outcome = r.clear_auxiliary("rec-1", &seq("5 k"), "tag").await;

    assert_eq!(outcome, ReconcileOutcome::Absent);
    assert!(!store.contains("rec-1"));
}

#[tokio::test]
async fn exhausted_budget_abandons_clear() {
    let store = Arc::new(MemoryAttributeStore::new());
    let r = Reconciler::new(store.clone()).with_retry(RetryPolicy::immediate(4));
    store.seed("rec-1", &[(SEQUENCER_ATTR, "5 k"), ("tag", "")]);
    store.fail_next(100);

    let outcome = r.clear_auxiliary("rec-1", &seq("5 k"), "tag").await;

    assert_eq!(outcome, ReconcileOutcome::Exhausted { attempts: 4 });
    store.fail_next(0);
    assert_eq!(store.values("rec-1", "tag"), vec![String::new()]);
}
