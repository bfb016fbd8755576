//! End-to-end leader election scenarios against the in-memory
//! coordinator.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use perch_core::backoff::ExponentialBackoff;
use perch_core::{CoordinationError, StartMode};
use perch_election::{ElectionConfig, ElectionHandle, LeaderElection};
use perch_testing::{wait_for, InMemoryCoordinator};

const NAMESPACE: &str = "/election";
const SESSION_TIMEOUT: Duration = Duration::from_secs(5);
const SETTLE: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

fn config() -> ElectionConfig {
    ElectionConfig::new(NAMESPACE, vec!["coord-1:2181".to_string()], SESSION_TIMEOUT)
}

/// Tight pacing so resilient-mode tests converge quickly.
fn fast_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new()
        .with_initial_interval(Duration::from_millis(10))
        .with_max_interval(Duration::from_millis(100))
}

/// Pacing slow enough that the flag's down window between attempts is
/// observable by a polling reader.
fn steady_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new()
        .with_initial_interval(Duration::from_millis(100))
        .with_max_interval(Duration::from_millis(300))
}

async fn start_engines(
    coordinator: &Arc<InMemoryCoordinator>,
    count: usize,
    mode: StartMode,
) -> Vec<ElectionHandle> {
    let mut handles = Vec::with_capacity(count);
    for _ in 0..count {
        let handle = LeaderElection::new(coordinator.clone(), config())
            .start(mode)
            .await
            .expect("start should succeed");
        handles.push(handle);
    }
    handles
}

fn leader_count(handles: &[ElectionHandle]) -> usize {
    handles.iter().filter(|handle| handle.is_leader()).count()
}

async fn stop(handle: ElectionHandle) {
    handle.cancel();
    timeout(SETTLE, handle.done())
        .await
        .expect("the engine should stop promptly after cancel");
}

#[tokio::test]
async fn a_single_candidate_becomes_leader() {
    init_logging();
    let coordinator = Arc::new(InMemoryCoordinator::new());
    coordinator.ensure_node(NAMESPACE);

    let handles = start_engines(&coordinator, 1, StartMode::AttemptOnce).await;
    assert!(wait_for(|| handles[0].is_leader(), SETTLE).await);

    let children = coordinator.children(NAMESPACE);
    assert_eq!(children.len(), 1);
    assert!(children[0].starts_with("c_00"));

    stop(handles.into_iter().next().unwrap()).await;
}

#[tokio::test]
async fn five_candidates_elect_exactly_one_leader() {
    init_logging();
    let coordinator = Arc::new(InMemoryCoordinator::new());
    coordinator.ensure_node(NAMESPACE);

    let handles = start_engines(&coordinator, 5, StartMode::AttemptOnce).await;
    assert!(
        wait_for(
            || coordinator.children(NAMESPACE).len() == 5 && leader_count(&handles) == 1,
            SETTLE
        )
        .await
    );

    for child in coordinator.children(NAMESPACE) {
        assert!(child.starts_with("c_00"));
    }
    assert_eq!(leader_count(&handles), 1);

    for handle in handles {
        stop(handle).await;
    }
    assert!(wait_for(|| coordinator.children(NAMESPACE).is_empty(), SETTLE).await);
}

#[tokio::test]
async fn the_survivors_elect_a_new_leader_after_failover() {
    init_logging();
    let coordinator = Arc::new(InMemoryCoordinator::new());
    coordinator.ensure_node(NAMESPACE);

    let mut handles = start_engines(&coordinator, 5, StartMode::AttemptOnce).await;
    assert!(
        wait_for(
            || coordinator.children(NAMESPACE).len() == 5 && leader_count(&handles) == 1,
            SETTLE
        )
        .await
    );

    let leader = handles
        .iter()
        .position(|handle| handle.is_leader())
        .expect("one engine should lead");
    stop(handles.remove(leader)).await;

    assert!(
        wait_for(
            || coordinator.children(NAMESPACE).len() == 4 && leader_count(&handles) == 1,
            SETTLE
        )
        .await
    );

    for handle in handles {
        stop(handle).await;
    }
}

#[tokio::test]
async fn cascaded_failover_drains_to_zero() {
    init_logging();
    let coordinator = Arc::new(InMemoryCoordinator::new());
    coordinator.ensure_node(NAMESPACE);

    let mut handles = start_engines(&coordinator, 5, StartMode::AttemptOnce).await;
    assert!(
        wait_for(
            || coordinator.children(NAMESPACE).len() == 5 && leader_count(&handles) == 1,
            SETTLE
        )
        .await
    );

    while !handles.is_empty() {
        let leader = handles
            .iter()
            .position(|handle| handle.is_leader())
            .expect("one survivor should lead");
        stop(handles.remove(leader)).await;

        let survivors = handles.len();
        let expected_leaders = usize::from(survivors > 0);
        assert!(
            wait_for(
                || {
                    coordinator.children(NAMESPACE).len() == survivors
                        && leader_count(&handles) == expected_leaders
                },
                SETTLE
            )
            .await,
            "expected {} children and {} leader(s)",
            survivors,
            expected_leaders
        );
    }

    assert!(coordinator.children(NAMESPACE).is_empty());
}

#[tokio::test]
async fn cancel_is_idempotent_and_completes_the_done_signal() {
    init_logging();
    let coordinator = Arc::new(InMemoryCoordinator::new());
    coordinator.ensure_node(NAMESPACE);

    let handles = start_engines(&coordinator, 1, StartMode::Resilient).await;
    let handle = &handles[0];
    assert!(wait_for(|| handle.is_leader(), SETTLE).await);

    handle.cancel();
    handle.cancel();
    handle.cancel();
    timeout(SETTLE, handle.done())
        .await
        .expect("done should fire after cancel");
    // The signal stays observable.
    timeout(SETTLE, handle.done())
        .await
        .expect("done should stay observable");

    assert!(!handle.is_leader());
    assert!(wait_for(|| coordinator.children(NAMESPACE).is_empty(), SETTLE).await);
    assert_eq!(coordinator.session_count(), 0);
}

#[tokio::test]
async fn start_rejects_invalid_configs_synchronously() {
    init_logging();
    let coordinator = Arc::new(InMemoryCoordinator::new());

    let mut no_servers = config();
    no_servers.servers.clear();
    let err = LeaderElection::new(coordinator.clone(), no_servers)
        .start(StartMode::Resilient)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinationError::Config { .. }));

    let mut no_namespace = config();
    no_namespace.namespace.clear();
    let err = LeaderElection::new(coordinator.clone(), no_namespace)
        .start(StartMode::Resilient)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinationError::Config { .. }));

    let mut no_timeout = config();
    no_timeout.session_timeout = Duration::ZERO;
    let err = LeaderElection::new(coordinator.clone(), no_timeout)
        .start(StartMode::Resilient)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinationError::Config { .. }));

    // No engine got far enough to register a session.
    assert_eq!(coordinator.session_count(), 0);
}

#[tokio::test]
async fn a_missing_namespace_is_fatal_in_attempt_once_mode() {
    init_logging();
    let coordinator = Arc::new(InMemoryCoordinator::new());

    let err = LeaderElection::new(coordinator.clone(), config())
        .start(StartMode::AttemptOnce)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinationError::Setup { .. }));
    assert_eq!(coordinator.session_count(), 0);
}

#[tokio::test]
async fn resilient_mode_retries_until_the_namespace_appears() {
    init_logging();
    let coordinator = Arc::new(InMemoryCoordinator::new());

    let handle = LeaderElection::new(coordinator.clone(), config().with_backoff(fast_backoff()))
        .start(StartMode::Resilient)
        .await
        .expect("resilient start should tolerate a failed first setup");
    assert!(!handle.is_leader());

    coordinator.ensure_node(NAMESPACE);
    assert!(wait_for(|| handle.is_leader(), SETTLE).await);
    assert_eq!(coordinator.children(NAMESPACE).len(), 1);

    stop(handle).await;
}

#[tokio::test]
async fn resilient_mode_recovers_from_session_expiry_without_leaking() {
    init_logging();
    let coordinator = Arc::new(InMemoryCoordinator::new());
    coordinator.ensure_node(NAMESPACE);

    let handle = LeaderElection::new(coordinator.clone(), config().with_backoff(steady_backoff()))
        .start(StartMode::Resilient)
        .await
        .expect("start should succeed");
    assert!(wait_for(|| handle.is_leader(), SETTLE).await);

    for _ in 0..3 {
        coordinator.expire_all_sessions();
        assert!(wait_for(|| !handle.is_leader(), SETTLE).await);
        assert!(
            wait_for(
                || {
                    handle.is_leader()
                        && coordinator.session_count() == 1
                        && coordinator.children(NAMESPACE).len() == 1
                },
                SETTLE
            )
            .await,
            "the engine should re-enter the election with exactly one session"
        );
    }

    stop(handle).await;
    assert_eq!(coordinator.session_count(), 0);
}

#[tokio::test]
async fn attempt_once_mode_stays_down_after_session_expiry() {
    init_logging();
    let coordinator = Arc::new(InMemoryCoordinator::new());
    coordinator.ensure_node(NAMESPACE);

    let handles = start_engines(&coordinator, 1, StartMode::AttemptOnce).await;
    let handle = &handles[0];
    assert!(wait_for(|| handle.is_leader(), SETTLE).await);

    coordinator.expire_all_sessions();
    timeout(SETTLE, handle.done())
        .await
        .expect("the attempt-once engine should stop after session loss");
    assert!(!handle.is_leader());
    assert!(coordinator.children(NAMESPACE).is_empty());
    assert_eq!(coordinator.session_count(), 0);
}
