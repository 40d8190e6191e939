// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for hot-plug handling in the device manager

use framegrab::backends::camera::{
    Device, DeviceListener, DeviceManager, DeviceManagerListener, FourCc, HotplugRegistry,
    NativeMediaDescriptor, SourceInfo, SyntheticBackend,
};
use std::sync::{Arc, Mutex};

fn yuyv() -> Vec<NativeMediaDescriptor> {
    vec![NativeMediaDescriptor {
        width: 2,
        height: 2,
        stride: 4,
        frame_rate: 15,
        fourcc: FourCc::YUYV,
    }]
}

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<String>>,
}

impl EventLog {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl DeviceManagerListener for EventLog {
    fn on_device_adding(&self, manager: &DeviceManager, source: &SourceInfo) {
        assert!(manager.device(&source.id).is_none());
        self.push(format!("adding {}", source.id));
    }

    fn on_device_added(&self, manager: &DeviceManager, device: &Device) {
        assert!(manager.device(device.id()).is_some());
        self.push(format!("added {}", device.id()));
    }

    fn on_device_removing(&self, manager: &DeviceManager, device: &Device) {
        assert!(manager.device(device.id()).is_some());
        self.push(format!("removing {}", device.id()));
    }

    fn on_device_removed(&self, manager: &DeviceManager, source: &SourceInfo) {
        assert!(manager.device(&source.id).is_none());
        self.push(format!("removed {}", source.id));
    }
}

impl DeviceListener for EventLog {
    fn on_device_stopping(&self, device: &Device) {
        self.push(format!("stopping {}", device.id()));
    }
}

fn ids(manager: &DeviceManager) -> Vec<&str> {
    manager.devices().iter().map(Device::id).collect()
}

#[test]
fn test_initial_enumeration_fires_events() {
    let backend = Arc::new(SyntheticBackend::new());
    backend.add_source("Cam A", "a", yuyv());
    backend.add_source("Cam B", "b", yuyv());

    let mut manager = DeviceManager::new(backend.clone());
    let log = Arc::new(EventLog::default());
    manager.add_listener(&log);
    manager.update();

    assert_eq!(ids(&manager), vec!["a", "b"]);
    assert_eq!(
        log.take(),
        vec!["adding a", "added a", "adding b", "added b"]
    );

    // No further change, no further events
    manager.update();
    assert!(log.take().is_empty());
}

#[test]
fn test_surviving_device_is_kept() {
    let backend = Arc::new(SyntheticBackend::new());
    backend.add_source("Cam A", "a", yuyv());
    backend.add_source("Cam B", "b", yuyv());

    let mut manager = DeviceManager::new(backend.clone());
    manager.update();
    manager.device_mut("b").unwrap().start_capture_at(0).unwrap();

    let log = Arc::new(EventLog::default());
    manager.add_listener(&log);

    backend.remove_source("a");
    backend.add_source("Cam C", "c", yuyv());
    manager.update();

    assert_eq!(ids(&manager), vec!["b", "c"]);
    assert_eq!(
        log.take(),
        vec!["adding c", "added c", "removing a", "removed a"]
    );
    // Same instance, so its capture survived the rescan
    assert!(manager.device("b").unwrap().is_capturing());
}

#[test]
fn test_removal_stops_capture() {
    let backend = Arc::new(SyntheticBackend::new());
    backend.add_source("Cam A", "a", yuyv());

    let mut manager = DeviceManager::new(backend.clone());
    manager.update();

    let log = Arc::new(EventLog::default());
    manager.add_listener(&log);
    let device = manager.device_mut("a").unwrap();
    device.add_listener(&log);
    device.start_capture_at(0).unwrap();
    assert_eq!(backend.open_reader_count(), 1);

    backend.remove_source("a");
    manager.update();

    assert!(manager.devices().is_empty());
    assert_eq!(backend.open_reader_count(), 0);
    assert_eq!(log.take(), vec!["removing a", "stopping a", "removed a"]);
}

#[test]
fn test_update_polls_devices() {
    let backend = Arc::new(SyntheticBackend::new());
    backend.add_source("Cam A", "a", yuyv());

    let mut manager = DeviceManager::new(backend.clone());
    manager.update();
    manager.device_mut("a").unwrap().start_capture_at(0).unwrap();
    let captured = manager.device("a").unwrap().captured_image().unwrap();
    assert_eq!(captured.sequence_number(), 0);

    assert!(backend.deliver("a", 20_000_000, &[9; 8]));
    manager.update();

    let captured = manager.device("a").unwrap().captured_image().unwrap();
    assert_eq!(captured.sequence_number(), 1);
    assert_eq!(captured.timestamp_secs(), 2.0);
    assert_eq!(captured.image().as_bytes(), &[9; 8]);
}

#[test]
fn test_enumeration_failure_keeps_devices() {
    let backend = Arc::new(SyntheticBackend::new());
    backend.add_source("Cam A", "a", yuyv());

    let mut manager = DeviceManager::new(backend.clone());
    manager.update();

    backend.set_enumeration_failure(true);
    backend.remove_source("a");
    manager.update();
    assert_eq!(ids(&manager), vec!["a"]);

    // Recovery picks up the change once reported again
    backend.set_enumeration_failure(false);
    manager.update();
    assert_eq!(ids(&manager), vec!["a"]);
    backend.trigger_hotplug();
    manager.update();
    assert!(manager.devices().is_empty());
}

#[test]
fn test_shared_registry_watch_lifetime() {
    let backend = Arc::new(SyntheticBackend::new());
    let registry = HotplugRegistry::new();

    let mut first = DeviceManager::with_registry(backend.clone(), &registry);
    let mut second = DeviceManager::with_registry(backend.clone(), &registry);
    assert_eq!(registry.registration_count(), 2);
    assert!(registry.is_watching());
    assert_eq!(backend.watch_count(), 1);

    first.update();
    second.update();

    // One event reaches every manager
    backend.add_source("Cam A", "a", yuyv());
    first.update();
    second.update();
    assert_eq!(ids(&first), vec!["a"]);
    assert_eq!(ids(&second), vec!["a"]);

    drop(first);
    assert!(registry.is_watching());
    drop(second);
    assert_eq!(registry.registration_count(), 0);
    assert!(!registry.is_watching());
    assert_eq!(backend.watch_count(), 0);
}

#[test]
fn test_drop_removes_devices() {
    let backend = Arc::new(SyntheticBackend::new());
    backend.add_source("Cam A", "a", yuyv());
    backend.add_source("Cam B", "b", yuyv());

    let mut manager = DeviceManager::new(backend.clone());
    manager.update();
    manager.device_mut("a").unwrap().start_capture_at(0).unwrap();

    let log = Arc::new(EventLog::default());
    manager.add_listener(&log);
    drop(manager);

    assert_eq!(
        log.take(),
        vec!["removing a", "removed a", "removing b", "removed b"]
    );
    assert_eq!(backend.open_reader_count(), 0);
}

#[test]
fn test_dropped_listener_is_skipped() {
    let backend = Arc::new(SyntheticBackend::new());
    backend.add_source("Cam A", "a", yuyv());

    let mut manager = DeviceManager::new(backend.clone());
    let log = Arc::new(EventLog::default());
    manager.add_listener(&log);
    drop(log);

    manager.update();
    assert_eq!(ids(&manager), vec!["a"]);
}
