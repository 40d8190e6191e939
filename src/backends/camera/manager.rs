// SPDX-License-Identifier: GPL-3.0-only

//! Device set lifecycle manager
//!
//! The manager provides:
//! - The live set of [`Device`]s, kept in sync with the backend's sources
//! - Coalesced hot-plug handling (one rescan per poll at most)
//! - Per-frame polling of every device

use super::hotplug::{HotplugRegistration, HotplugRegistry};
use super::listeners::ListenerSet;
use super::{CaptureBackend, Device, SourceInfo};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Observer of devices appearing and disappearing
///
/// Creation is bracketed by `adding`/`added`, destruction by
/// `removing`/`removed`.
pub trait DeviceManagerListener: Send + Sync {
    fn on_device_adding(&self, _manager: &DeviceManager, _source: &SourceInfo) {}
    fn on_device_added(&self, _manager: &DeviceManager, _device: &Device) {}
    fn on_device_removing(&self, _manager: &DeviceManager, _device: &Device) {}
    fn on_device_removed(&self, _manager: &DeviceManager, _source: &SourceInfo) {}
}

/// Owner of every live device on one backend
pub struct DeviceManager {
    backend: Arc<dyn CaptureBackend>,
    devices: Vec<Device>,
    listeners: ListenerSet<dyn DeviceManagerListener>,
    hotplug: HotplugRegistration,
}

impl DeviceManager {
    /// Create a manager with its own hot-plug registry
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self::with_registry(backend, &HotplugRegistry::new())
    }

    /// Create a manager that shares a hot-plug registry with others
    pub fn with_registry(backend: Arc<dyn CaptureBackend>, registry: &Arc<HotplugRegistry>) -> Self {
        info!(backend = %backend.backend_type(), "Creating device manager");
        let hotplug = registry.register(backend.as_ref());
        Self {
            backend,
            devices: Vec::new(),
            listeners: ListenerSet::new(),
            hotplug,
        }
    }

    pub fn backend(&self) -> &Arc<dyn CaptureBackend> {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<HotplugRegistry> {
        self.hotplug.registry()
    }

    /// Rescan if a device change was reported, then poll every device
    pub fn update(&mut self) {
        if self.hotplug.take_pending() {
            self.refresh();
        }
        for device in &mut self.devices {
            device.update();
        }
    }

    /// Force a rescan on the next [`update`](Self::update)
    pub fn request_rescan(&self) {
        self.hotplug.mark_pending();
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id() == id)
    }

    pub fn device_mut(&mut self, id: &str) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.id() == id)
    }

    pub fn device_at_mut(&mut self, index: usize) -> Option<&mut Device> {
        self.devices.get_mut(index)
    }

    /// Register a listener; the manager only keeps a weak reference
    pub fn add_listener<L: DeviceManagerListener + 'static>(&mut self, listener: &Arc<L>) {
        let listener: Arc<dyn DeviceManagerListener> = listener.clone();
        self.listeners.add(Arc::downgrade(&listener));
    }

    /// Unregister a listener; `false` if it was not registered
    pub fn remove_listener<L: DeviceManagerListener + 'static>(&mut self, listener: &Arc<L>) -> bool {
        let listener: Arc<dyn DeviceManagerListener> = listener.clone();
        self.listeners.remove(&listener)
    }

    /// Diff the backend's sources against the live set by identifier
    ///
    /// New sources are opened first, then devices whose source vanished are
    /// destroyed. If enumeration fails the current set is kept.
    fn refresh(&mut self) {
        let sources = match self.backend.enumerate_sources() {
            Ok(sources) => sources,
            Err(e) => {
                warn!(error = %e, "Device enumeration failed, keeping current devices");
                return;
            }
        };

        let mut seen = HashSet::new();
        let sources: Vec<SourceInfo> = sources
            .into_iter()
            .filter(|source| {
                let fresh = seen.insert(source.id.clone());
                if !fresh {
                    debug!(device = %source.id, "Ignoring duplicate source identifier");
                }
                fresh
            })
            .collect();
        debug!(count = sources.len(), "Enumerated sources");

        for source in &sources {
            if self.device(&source.id).is_none() {
                self.add_device(source);
            }
        }

        let mut index = 0;
        while index < self.devices.len() {
            if seen.contains(self.devices[index].id()) {
                index += 1;
            } else {
                self.remove_device_at(index);
            }
        }
    }

    fn add_device(&mut self, source: &SourceInfo) {
        self.listeners
            .for_each(|l| l.on_device_adding(self, source));

        let device = Device::open(Arc::clone(&self.backend), source.clone());
        info!(
            device = %source.id,
            name = %source.name,
            settings = device.supported_settings().len(),
            "Device added"
        );
        self.devices.push(device);

        if let Some(device) = self.devices.last() {
            self.listeners.for_each(|l| l.on_device_added(self, device));
        }
    }

    fn remove_device_at(&mut self, index: usize) {
        let Some(device) = self.devices.get(index) else {
            return;
        };
        self.listeners
            .for_each(|l| l.on_device_removing(self, device));

        let device = self.devices.remove(index);
        let source = SourceInfo::new(device.name(), device.id());
        // Dropping stops any running capture
        drop(device);
        info!(device = %source.id, "Device removed");

        self.listeners
            .for_each(|l| l.on_device_removed(self, &source));
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        while !self.devices.is_empty() {
            self.remove_device_at(0);
        }
    }
}
