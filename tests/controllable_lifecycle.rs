//! Connect, refresh and teardown ordering of the controllable-device wrapper.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use astro_sequencer::device::{Controllable, DeviceKind, DriverRegistry};
use astro_sequencer::drivers::{AnyDriver, Camera, Mount};
use astro_sequencer::ImagingError;
use common::{fake_id, CameraScript, EventLog, FakeCamera, FakeMount, FakeRig, MountScript};

fn fake_camera(script: &Arc<CameraScript>, log: &Arc<EventLog>) -> Controllable<dyn Camera> {
    Controllable::from_driver(
        fake_id(DeviceKind::Camera, "cam"),
        Box::new(FakeCamera {
            script: script.clone(),
            log: log.clone(),
        }),
    )
}

#[tokio::test]
async fn test_dispose_order_and_idempotence() {
    let script = Arc::new(CameraScript::default());
    let log = Arc::new(EventLog::default());
    let mut camera = fake_camera(&script, &log);
    assert_eq!(script.connection.subscriber_count(), 1);

    camera.ensure_connected().await.unwrap();
    assert_eq!(camera.capabilities().sensor_width, 4);

    camera.dispose().await.unwrap();
    camera.dispose().await.unwrap();

    assert_eq!(
        log.events(),
        vec!["camera.connected=true", "camera.connected=false", "camera.release"]
    );
    assert_eq!(script.connection.subscriber_count(), 0);
    assert_eq!(camera.capabilities().sensor_width, 0);
    assert!(matches!(camera.driver(), Err(ImagingError::Disposed(_))));
}

#[tokio::test]
async fn test_dispose_skips_disconnect_when_never_connected() {
    let script = Arc::new(CameraScript::default());
    let log = Arc::new(EventLog::default());
    let mut camera = fake_camera(&script, &log);

    camera.dispose().await.unwrap();
    assert_eq!(log.events(), vec!["camera.release"]);
}

#[tokio::test]
async fn test_failed_connect_leaves_capabilities_zeroed() {
    let script = Arc::new(MountScript::default());
    script.fail_connect.store(true, Ordering::SeqCst);
    let mut mount: Controllable<dyn Mount> = Controllable::from_driver(
        fake_id(DeviceKind::Mount, "mount"),
        Box::new(FakeMount {
            script: script.clone(),
            log: Arc::new(EventLog::default()),
        }),
    );

    match mount.ensure_connected().await {
        Err(ImagingError::Connection { reason, .. }) => assert!(reason.contains("serial port busy")),
        other => panic!("unexpected result {other:?}"),
    }
    assert!(!mount.is_connected());
    assert!(!mount.capabilities().can_set_tracking);

    script.fail_connect.store(false, Ordering::SeqCst);
    mount.ensure_connected().await.unwrap();
    assert!(mount.capabilities().can_set_tracking);
    mount.dispose().await.unwrap();
}

#[tokio::test]
async fn test_spontaneous_disconnect_clears_capabilities_on_refresh() {
    let script = Arc::new(CameraScript::default());
    let log = Arc::new(EventLog::default());
    let mut camera = fake_camera(&script, &log);
    camera.set_connected(true).await.unwrap();
    assert!(camera.capabilities().can_set_ccd_temperature);

    // USB cable pulled: the backend flips its flag without going through the wrapper
    script.connection.set(false);
    camera.refresh();
    assert!(!camera.capabilities().can_set_ccd_temperature);
    assert!(!camera.is_connected());

    // ensure_connected reconnects and snapshots again
    camera.ensure_connected().await.unwrap();
    assert!(camera.capabilities().can_set_ccd_temperature);
    camera.dispose().await.unwrap();
}

#[tokio::test]
async fn test_setup_teardown_is_best_effort() {
    let rig = FakeRig::default();
    rig.camera.fail_release.store(true, Ordering::SeqCst);
    let mut setup = rig.setup();
    setup.mount_mut().ensure_connected().await.unwrap();
    setup.telescopes_mut()[0]
        .camera
        .ensure_connected()
        .await
        .unwrap();

    match setup.dispose().await {
        Err(ImagingError::TeardownFailed(errors)) => {
            assert_eq!(errors.len(), 1);
            assert!(errors[0].to_string().contains("SDK handle already closed"));
        }
        other => panic!("unexpected result {other:?}"),
    }

    // The camera failure did not stop the mount from being released
    let events = rig.log.events();
    let camera_release = events.iter().position(|e| e == "camera.release").unwrap();
    let mount_release = events.iter().position(|e| e == "mount.release").unwrap();
    assert!(camera_release < mount_release);
    assert_eq!(rig.log.count("mount.connected=false"), 1);
    assert!(setup.mount().is_disposed());
}

#[tokio::test]
async fn test_registry_builds_typed_wrapper_from_identity() {
    let script = Arc::new(CameraScript::default());
    let log = Arc::new(EventLog::default());
    let mut registry = DriverRegistry::new();
    {
        let script = script.clone();
        let log = log.clone();
        registry.register(DeviceKind::Camera, "fake", move |_id| {
            Ok(AnyDriver::Camera(Box::new(FakeCamera {
                script: script.clone(),
                log: log.clone(),
            })))
        });
    }

    let id = fake_id(DeviceKind::Camera, "cam");
    let mut camera: Controllable<dyn Camera> = Controllable::new(id.clone(), &registry).unwrap();
    assert_eq!(camera.device(), &id);

    let mount: Result<Controllable<dyn Mount>, _> =
        Controllable::new(fake_id(DeviceKind::Mount, "m"), &registry);
    assert!(matches!(
        mount,
        Err(ImagingError::DriverInstantiation { .. })
    ));

    camera.dispose().await.unwrap();
    assert_eq!(log.events(), vec!["camera.release"]);
}
