use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;
use washalert::config::Config;
use washalert::identity::{IdentityContext, Role};
use washalert::lifecycle::{NotificationPipeline, PipelineHealth, SectionState, run_identity_loop};
use washalert::notifications::dispatcher::DispatchStatus;
use washalert::notifications::router::{NavigationTarget, Navigator};
use washalert::platform::PermissionState;
use washalert::platform::memory::InMemoryPlatform;
use washalert::stream::memory::InMemoryChangeStream;
use washalert::stream::record::ChangeRecord;

const TABLE: &str = "wash_requests";

#[derive(Default)]
struct RecordingNavigator {
    targets: Mutex<Vec<NavigationTarget>>,
}

impl RecordingNavigator {
    fn routes(&self) -> Vec<String> {
        self.targets
            .lock()
            .unwrap()
            .iter()
            .map(NavigationTarget::route)
            .collect()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, target: NavigationTarget) {
        self.targets.lock().unwrap().push(target);
    }
}

struct Harness {
    backend: InMemoryChangeStream,
    platform: InMemoryPlatform,
    navigator: Arc<RecordingNavigator>,
    pipeline: NotificationPipeline,
}

fn harness(platform: InMemoryPlatform) -> Harness {
    harness_with(platform, "")
}

fn harness_with(platform: InMemoryPlatform, stream_overrides: &str) -> Harness {
    let config = Config::from_toml(&format!(
        "[stream]\nbase_backoff_ms = 5\nmax_backoff_ms = 20\n{stream_overrides}"
    ))
    .unwrap();
    let backend = InMemoryChangeStream::new();
    let navigator = Arc::new(RecordingNavigator::default());
    let pipeline = NotificationPipeline::new(
        Arc::new(backend.clone()),
        Arc::new(platform.clone()),
        navigator.clone(),
        &config,
    );
    Harness {
        backend,
        platform,
        navigator,
        pipeline,
    }
}

fn transition(id: &str, org: &str, from: &str, to: &str) -> ChangeRecord {
    ChangeRecord::update(
        TABLE,
        json!({"id": id, "status": from, "client_organization_id": org}),
        json!({"id": id, "status": to, "client_organization_id": org}),
    )
}

async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    eventually_within(Duration::from_secs(2), check).await
}

async fn eventually_within<F: Fn() -> bool>(limit: Duration, check: F) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn provider_new_request_is_shown_and_tap_opens_provider_detail() {
    let h = harness(InMemoryPlatform::new(PermissionState::Undetermined));
    assert!(h.pipeline.start_tap_routing().await);
    assert!(!h.pipeline.start_tap_routing().await);

    let section = h.pipeline.register(IdentityContext::provider("p1", None));
    assert_eq!(section.ready().await, SectionState::Active);
    assert_eq!(section.subscription_count(), 1);
    assert_eq!(h.platform.prompt_count(), 1);
    assert!(eventually(|| h.backend.active_subscriptions() == 1).await);
    assert!(eventually(|| section.health() == PipelineHealth::Healthy).await);

    h.backend.emit(ChangeRecord::insert(
        TABLE,
        json!({"id": "r1", "status": "pending", "address": "12 Rue X"}),
    ));
    assert!(eventually(|| h.platform.presented().len() == 1).await);
    let shown = h.platform.presented().remove(0);
    assert_eq!(
        shown.data,
        json!({"type": "new_request", "requestId": "r1", "address": "12 Rue X"})
    );

    assert_eq!(h.platform.tap(shown.data.clone()), 1);
    assert!(eventually(|| !h.navigator.routes().is_empty()).await);
    assert_eq!(h.navigator.routes(), vec!["provider/requests/detail?id=r1"]);

    h.platform.tap(json!({"type": "promo", "requestId": "r1"}));
    settle().await;
    assert_eq!(h.navigator.routes().len(), 1);
}

#[tokio::test]
async fn client_accepted_tap_opens_client_detail() {
    let h = harness(InMemoryPlatform::default());
    h.pipeline.start_tap_routing().await;
    let section = h.pipeline.register(IdentityContext::client("c1", "org1"));
    assert_eq!(section.ready().await, SectionState::Active);
    assert_eq!(section.subscription_count(), 2);
    assert!(eventually(|| h.backend.active_subscriptions() == 2).await);

    h.backend.emit(transition("r7", "org1", "pending", "accepted"));
    assert!(eventually(|| h.platform.presented().len() == 1).await);
    settle().await;
    let shown = h.platform.presented();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].data, json!({"type": "request_accepted", "requestId": "r7"}));

    h.platform.tap(shown[0].data.clone());
    assert!(eventually(|| !h.navigator.routes().is_empty()).await);
    assert_eq!(h.navigator.routes(), vec!["client/requests/detail?id=r7"]);
}

#[tokio::test]
async fn client_section_ignores_other_organization() {
    let h = harness(InMemoryPlatform::default());
    let section = h.pipeline.register(IdentityContext::client("c1", "org1"));
    section.ready().await;
    assert!(eventually(|| h.backend.active_subscriptions() == 2).await);

    h.backend.emit(transition("r1", "org2", "pending", "accepted"));
    h.backend.emit_unfiltered(transition("r2", "org2", "pending", "accepted"));
    settle().await;
    assert!(h.platform.presented().is_empty());
}

#[tokio::test]
async fn unmount_before_any_event_shows_nothing() {
    let h = harness(InMemoryPlatform::default());
    let section = h.pipeline.register(IdentityContext::client("c1", "org1"));
    section.ready().await;
    assert!(eventually(|| h.backend.active_subscriptions() == 2).await);

    assert!(section.dispose());
    assert!(!section.dispose());
    assert_eq!(section.state(), SectionState::TornDown);
    assert_eq!(h.pipeline.active_sections(), 0);

    h.backend.emit(transition("r1", "org1", "pending", "accepted"));
    h.backend.emit(transition("r2", "org1", "accepted", "cancelled"));
    settle().await;
    assert!(h.platform.presented().is_empty());
    assert!(eventually(|| h.backend.active_subscriptions() == 0).await);
}

#[tokio::test]
async fn dispose_during_registration_opens_no_subscription() {
    let platform = InMemoryPlatform::new(PermissionState::Undetermined)
        .with_prompt_delay(Duration::from_millis(100));
    let h = harness(platform);
    let section = h.pipeline.register(IdentityContext::provider("p1", None));
    assert_eq!(section.state(), SectionState::Registering);

    section.dispose();
    assert_eq!(section.ready().await, SectionState::TornDown);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.backend.open_count(), 0);
    assert_eq!(section.subscription_count(), 0);

    let again = h.pipeline.register(IdentityContext::provider("p1", None));
    assert_eq!(again.ready().await, SectionState::Active);
    assert!(eventually(|| h.backend.active_subscriptions() == 1).await);
}

#[tokio::test]
async fn permission_denied_suppresses_notifications_without_error() {
    let h = harness(InMemoryPlatform::new(PermissionState::Denied));
    let section = h.pipeline.register(IdentityContext::client("c1", "org1"));
    assert_eq!(section.ready().await, SectionState::Active);
    assert!(eventually(|| h.backend.active_subscriptions() == 2).await);

    h.backend.emit(transition("r1", "org1", "pending", "cancelled"));
    settle().await;
    assert!(h.platform.presented().is_empty());

    h.platform.set_permission(PermissionState::Granted);
    h.backend.emit(transition("r2", "org1", "pending", "cancelled"));
    assert!(eventually(|| h.platform.presented().len() == 1).await);
}

#[tokio::test]
async fn section_torn_down_mid_dispatch_shows_nothing() {
    let platform = InMemoryPlatform::default().with_query_delay(Duration::from_millis(100));
    let h = harness(platform);
    let section = h.pipeline.register(IdentityContext::provider("p1", None));
    assert_eq!(section.ready().await, SectionState::Active);
    assert!(eventually(|| h.backend.active_subscriptions() == 1).await);

    h.backend.emit(ChangeRecord::insert(TABLE, json!({"id": "r1", "status": "pending"})));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(section.dispose());
    assert_eq!(section.state(), SectionState::TornDown);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.platform.presented().is_empty());
    assert_eq!(h.pipeline.dispatcher().log().count(DispatchStatus::Cancelled), 1);
}

#[tokio::test]
async fn burst_is_not_serialized_behind_permission_checks() {
    let platform = InMemoryPlatform::default().with_query_delay(Duration::from_millis(60));
    let h = harness(platform);
    let section = h.pipeline.register(IdentityContext::provider("p1", None));
    section.ready().await;
    assert!(eventually(|| h.backend.active_subscriptions() == 1).await);

    let started = Instant::now();
    for index in 0..8 {
        h.backend.emit(ChangeRecord::insert(
            TABLE,
            json!({"id": format!("r{index}"), "status": "pending"}),
        ));
    }
    assert!(eventually(|| h.platform.presented().len() == 8).await);
    assert!(started.elapsed() < Duration::from_millis(400));
}

#[tokio::test]
async fn section_health_degrades_and_recovers() {
    let h = harness_with(
        InMemoryPlatform::default(),
        "max_reconnect_attempts = 2\ndegraded_probe_secs = 1\n",
    );
    h.backend.fail_next_opens(usize::MAX);
    let section = h.pipeline.register(IdentityContext::client("c1", "org1"));
    assert_eq!(section.ready().await, SectionState::Active);
    assert!(eventually(|| section.health() == PipelineHealth::Degraded).await);

    h.backend.fail_next_opens(0);
    assert!(
        eventually_within(Duration::from_secs(4), || {
            section.health() == PipelineHealth::Healthy
        })
        .await
    );
    assert_eq!(h.backend.active_subscriptions(), 2);

    h.backend.emit(transition("r1", "org1", "pending", "accepted"));
    assert!(eventually(|| h.platform.presented().len() == 1).await);
}

#[tokio::test]
async fn revoked_permission_is_caught_at_render_time() {
    let h = harness(InMemoryPlatform::default());
    let dispatcher = h.pipeline.dispatcher();
    h.platform.set_permission(PermissionState::Denied);
    let status = dispatcher
        .show("t", "b", json!({"type": "new_request", "requestId": "r1"}))
        .await;
    assert_eq!(status, DispatchStatus::SuppressedPermission);
    assert!(h.platform.presented().is_empty());
}

#[tokio::test]
async fn burst_of_cancellations_is_shown_independently() {
    let h = harness(InMemoryPlatform::default());
    let section = h.pipeline.register(IdentityContext::client("c1", "org1"));
    section.ready().await;
    assert!(eventually(|| h.backend.active_subscriptions() == 2).await);

    h.platform.fail_next_presents(1);
    for index in 0..10 {
        h.backend
            .emit(transition(&format!("r{index}"), "org1", "accepted", "cancelled"));
    }
    assert!(eventually(|| h.platform.presented().len() == 9).await);
    assert_eq!(h.pipeline.dispatcher().log().count(DispatchStatus::Failed), 1);
}

#[tokio::test]
async fn admin_section_is_active_without_subscriptions() {
    let h = harness(InMemoryPlatform::default());
    let section = h.pipeline.register(IdentityContext::admin("a1"));
    assert_eq!(section.ready().await, SectionState::Active);
    assert_eq!(section.subscription_count(), 0);
    assert_eq!(section.health(), PipelineHealth::Idle);
    settle().await;
    assert_eq!(h.backend.open_count(), 0);
}

#[tokio::test]
async fn client_without_organization_fails_closed() {
    let h = harness(InMemoryPlatform::default());
    let identity = IdentityContext {
        user_id: "c1".to_string(),
        role: Role::Client,
        organization_id: None,
    };
    let section = h.pipeline.register(identity);
    assert_eq!(section.ready().await, SectionState::Active);
    assert_eq!(section.subscription_count(), 0);
    settle().await;
    assert_eq!(h.backend.open_count(), 0);
}

#[tokio::test]
async fn identity_changes_reregister_the_section() {
    let h = harness(InMemoryPlatform::default());
    h.pipeline.start_tap_routing().await;
    let (tx, rx) = tokio::sync::watch::channel(Some(IdentityContext::client("u1", "org1")));
    let follower = tokio::spawn(run_identity_loop(h.pipeline.clone(), rx));

    assert!(eventually(|| h.backend.active_subscriptions() == 2).await);
    assert_eq!(h.pipeline.active_sections(), 1);

    tx.send(Some(IdentityContext::provider("u1", None))).unwrap();
    assert!(
        eventually(|| {
            h.backend.active_subscriptions() == 1
                && h.pipeline.router().active_role() == Some(Role::Provider)
        })
        .await
    );
    assert_eq!(h.pipeline.active_sections(), 1);

    h.backend.emit(transition("old", "org1", "pending", "accepted"));
    settle().await;
    assert!(h.platform.presented().is_empty());

    tx.send(None).unwrap();
    assert!(eventually(|| h.backend.active_subscriptions() == 0).await);
    assert_eq!(h.pipeline.active_sections(), 0);
    assert_eq!(h.pipeline.router().active_role(), None);

    drop(tx);
    follower.await.unwrap();
}
