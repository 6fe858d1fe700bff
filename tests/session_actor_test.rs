//! Tests for the session actor request queue.

use std::time::Duration;

use mirao_dm::{
    actor::{SessionActor, SessionHandle, DEFAULT_QUEUE_CAPACITY},
    config::DmConfig,
    context::ContextState,
    driver::simulated::{DriverCall, SimulatedMirror, SimulationMonitor},
    error::{ArtifactKind, DmError},
    session::WavefrontSession,
    zernike::Mode,
};
use tempfile::TempDir;
use tokio::task::JoinHandle;

fn spawn_actor(settle_time: Duration) -> (TempDir, SessionHandle, JoinHandle<()>, SimulationMonitor) {
    spawn_actor_with_capacity(settle_time, DEFAULT_QUEUE_CAPACITY)
}

fn spawn_actor_with_capacity(
    settle_time: Duration,
    capacity: usize,
) -> (TempDir, SessionHandle, JoinHandle<()>, SimulationMonitor) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut config = DmConfig::default();
    config.paths.mirror_init = dir.path().join("MIRAO_initialization.dat");
    config.paths.calibration = dir.path().join("MIRAO_calibration.aomi");
    config.paths.calibration_params = dir.path().join("Diversity_calibration.xml");
    config.paths.diversity_prefs = dir.path().join("Diversity_prefs.xml");
    config.paths.startup_wavefront = None;
    config.paths.save_path = dir.path().join("WavefrontCorrection_save.wcs");
    let paths = config.artifact_paths();
    for (_, path) in paths.in_check_order() {
        std::fs::write(path, "sim").unwrap();
    }

    let mirror = SimulatedMirror::with_settle_time(settle_time);
    let monitor = mirror.monitor();
    let session = WavefrontSession::new(mirror, config);
    let (handle, task) = SessionActor::spawn(session, capacity);
    (dir, handle, task, monitor)
}

#[tokio::test]
async fn test_actor_round_trip() {
    let (_dir, handle, task, monitor) = spawn_actor(Duration::ZERO);

    handle.initialize().await.unwrap();
    assert_eq!(handle.set_mode(Mode::Defocus, 1.7).await.unwrap(), 1.0);
    handle.apply_pending().await.unwrap();
    assert_eq!(handle.current_target(Mode::Defocus).await.unwrap(), 1.0);
    assert_eq!(handle.get_property("Z20").await.unwrap(), "1");

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ContextState::Ready);
    assert_eq!(snapshot.applied.get(Mode::Defocus), 1.0);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    assert_eq!(monitor.open_handles(), 0);
}

#[tokio::test]
async fn test_concurrent_callers_are_serialized() {
    let (_dir, handle, task, monitor) = spawn_actor(Duration::from_millis(2));
    handle.initialize().await.unwrap();

    let mut workers = Vec::new();
    for mode in Mode::ALL {
        let handle = handle.clone();
        workers.push(tokio::spawn(async move {
            handle.set_mode(mode, 0.05 * mode.index() as f64).await?;
            handle.apply_pending().await?;
            Ok::<(), DmError>(())
        }));
    }
    for worker in workers {
        worker.await.unwrap().unwrap();
    }

    for mode in Mode::ALL {
        let expected = 0.05 * mode.index() as f64;
        let actual = handle.current_target(mode).await.unwrap();
        assert!((actual - expected).abs() < 1e-12, "{mode}: {actual}");
    }
    let snapshot = handle.snapshot().await.unwrap();
    assert!(snapshot.pending.is_zero());

    // every relative command carried at least one delta, none was lost
    let dispatched = monitor.count(|c| matches!(c, DriverCall::ApplyRelative(_)));
    assert!((1..=Mode::ALL.len()).contains(&dispatched));

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_errors_pass_through_the_queue() {
    let (dir, handle, task, _monitor) = spawn_actor(Duration::ZERO);

    assert!(matches!(handle.apply_pending().await, Err(DmError::NotReady)));
    handle.initialize().await.unwrap();

    let err = handle
        .set_artifact_path(ArtifactKind::Calibration, dir.path().join("missing.aomi"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), 10202);

    let err = handle.set_property("Port", "COM2").await.unwrap_err();
    assert!(matches!(err, DmError::PortChangeForbidden));

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_requests_after_shutdown_fail() {
    let (_dir, handle, task, _monitor) = spawn_actor(Duration::ZERO);
    handle.initialize().await.unwrap();
    handle.shutdown().await.unwrap();
    task.await.unwrap();

    assert!(matches!(
        handle.set_mode(Mode::Tip, 0.1).await,
        Err(DmError::ActorUnavailable)
    ));
}

#[tokio::test]
async fn test_dropping_all_handles_releases_mirror() {
    let (_dir, handle, task, monitor) = spawn_actor(Duration::ZERO);
    handle.initialize().await.unwrap();
    assert_eq!(monitor.open_handles(), 1);

    drop(handle);
    task.await.unwrap();
    assert_eq!(monitor.open_handles(), 0);
}

#[tokio::test]
async fn test_save_position_through_actor() {
    let (dir, handle, task, _monitor) = spawn_actor(Duration::ZERO);
    handle.initialize().await.unwrap();

    handle.save_position(None).await.unwrap();
    assert!(dir.path().join("WavefrontCorrection_save.wcs").is_file());

    let explicit = dir.path().join("explicit.wcs");
    handle.save_position(Some(explicit.clone())).await.unwrap();
    handle.load_wavefront(&explicit).await.unwrap();
    assert_eq!(
        handle.get_property("Load wavefront").await.unwrap(),
        explicit.display().to_string()
    );

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_release_allows_reinitialize() {
    let (_dir, handle, task, monitor) = spawn_actor(Duration::ZERO);
    handle.initialize().await.unwrap();
    handle.set_mode(Mode::Tip, 0.4).await.unwrap();

    handle.release().await.unwrap();
    assert_eq!(monitor.open_handles(), 0);
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ContextState::Uninitialized);
    assert_eq!(handle.current_target(Mode::Tip).await.unwrap(), 0.0);

    handle.initialize().await.unwrap();
    assert_eq!(monitor.open_handles(), 1);
    handle.set_mode(Mode::Tip, 0.1).await.unwrap();
    handle.apply_pending().await.unwrap();
    assert_eq!(handle.current_target(Mode::Tip).await.unwrap(), 0.1);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_zero_capacity_queue_still_serves() {
    let (_dir, handle, task, _monitor) = spawn_actor_with_capacity(Duration::ZERO, 0);
    handle.initialize().await.unwrap();
    assert_eq!(handle.set_mode(Mode::Defocus, 0.5).await.unwrap(), 0.5);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}
