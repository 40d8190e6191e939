// SPDX-License-Identifier: GPL-3.0-only

//! Routing of platform hot-plug events to device managers
//!
//! Every manager registers a "rescan pending" flag. The platform watch is
//! started with the first registration and dropped with the last one; each
//! event raises every live flag, and managers clear their own flag when they
//! re-enumerate. Any number of events between two polls collapse into one
//! rescan.

use super::{CaptureBackend, HotplugWatch};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{debug, info};

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    flags: HashMap<u64, Weak<AtomicBool>>,
    watch: Option<Box<dyn HotplugWatch>>,
    /// Set while one registration is starting the watch outside the lock
    watch_starting: bool,
}

/// Set of live manager flags, shared by everything watching one backend
#[derive(Default)]
pub struct HotplugRegistry {
    state: Mutex<RegistryState>,
}

impl HotplugRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a new listener flag, starting the backend watch if needed
    ///
    /// The flag starts raised so the first poll enumerates.
    pub fn register(self: &Arc<Self>, backend: &dyn CaptureBackend) -> HotplugRegistration {
        let flag = Arc::new(AtomicBool::new(true));

        let (id, first) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let id = state.next_id;
            state.next_id += 1;
            state.flags.insert(id, Arc::downgrade(&flag));
            debug!(id, registered = state.flags.len(), "Hot-plug listener registered");

            let first = state.watch.is_none() && !state.watch_starting;
            if first {
                state.watch_starting = true;
            }
            (id, first)
        };

        if first {
            // The backend may notify synchronously, so call it unlocked
            let watch = backend.watch_device_changes(HotplugNotifier {
                registry: Arc::downgrade(self),
            });
            if watch.is_some() {
                info!(backend = %backend.backend_type(), "Hot-plug watch started");
            }
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.watch_starting = false;
            if state.flags.is_empty() {
                drop(state);
                drop(watch);
            } else {
                state.watch = watch;
            }
        }

        HotplugRegistration {
            registry: Arc::clone(self),
            id,
            flag,
        }
    }

    /// Mark every registered listener as needing a rescan
    pub fn notify_device_change(&self) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(listeners = state.flags.len(), "Device change notification");
        for flag in state.flags.values().filter_map(Weak::upgrade) {
            flag.store(true, Ordering::SeqCst);
        }
    }

    /// Number of live registrations
    pub fn registration_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flags
            .len()
    }

    /// Whether a platform watch is running
    pub fn is_watching(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .watch
            .is_some()
    }

    fn unregister(&self, id: u64) {
        let watch = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.flags.remove(&id);
            if state.flags.is_empty() {
                state.watch.take()
            } else {
                None
            }
        };
        // Watch teardown may join a thread that notifies through this registry
        if watch.is_some() {
            info!("Hot-plug watch stopped");
        }
        drop(watch);
    }
}

/// Handle given to a backend watch for reporting device changes
#[derive(Clone)]
pub struct HotplugNotifier {
    registry: Weak<HotplugRegistry>,
}

impl HotplugNotifier {
    /// Report that the set of devices may have changed
    ///
    /// Returns `false` once the registry is gone.
    pub fn notify(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => {
                registry.notify_device_change();
                true
            }
            None => false,
        }
    }
}

/// A manager's membership in a registry; unregisters on drop
pub struct HotplugRegistration {
    registry: Arc<HotplugRegistry>,
    id: u64,
    flag: Arc<AtomicBool>,
}

impl HotplugRegistration {
    /// Read and clear the pending flag
    pub fn take_pending(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }

    /// Raise the flag for this registration only
    pub fn mark_pending(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn registry(&self) -> &Arc<HotplugRegistry> {
        &self.registry
    }
}

impl Drop for HotplugRegistration {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::SyntheticBackend;

    #[test]
    fn test_first_poll_is_pending() {
        let backend = SyntheticBackend::new();
        let registry = HotplugRegistry::new();
        let registration = registry.register(&backend);

        assert!(registration.take_pending());
        assert!(!registration.take_pending());
    }

    #[test]
    fn test_notifications_coalesce_and_fan_out() {
        let backend = SyntheticBackend::new();
        let registry = HotplugRegistry::new();
        let a = registry.register(&backend);
        let b = registry.register(&backend);
        a.take_pending();
        b.take_pending();

        registry.notify_device_change();
        registry.notify_device_change();
        registry.notify_device_change();

        assert!(a.take_pending());
        assert!(!a.take_pending());
        assert!(b.take_pending());
    }

    #[test]
    fn test_watch_follows_registrations() {
        let backend = SyntheticBackend::new();
        let registry = HotplugRegistry::new();
        assert!(!registry.is_watching());

        let a = registry.register(&backend);
        assert!(registry.is_watching());
        let b = registry.register(&backend);
        assert_eq!(registry.registration_count(), 2);

        drop(a);
        assert!(registry.is_watching());
        drop(b);
        assert!(!registry.is_watching());
        assert_eq!(registry.registration_count(), 0);

        // A fresh registration restarts the watch
        let _c = registry.register(&backend);
        assert!(registry.is_watching());
    }

    #[test]
    fn test_concurrent_registrations_start_one_watch() {
        use crate::backends::camera::{
            BackendError, BackendResult, CaptureBackendType, NativeReader, SampleSink, SourceInfo,
        };
        use std::sync::Barrier;
        use std::sync::atomic::AtomicUsize;
        use std::time::Duration;

        struct NoopWatch;
        impl HotplugWatch for NoopWatch {}

        #[derive(Default)]
        struct SlowWatchBackend {
            watches: AtomicUsize,
        }

        impl CaptureBackend for SlowWatchBackend {
            fn backend_type(&self) -> CaptureBackendType {
                CaptureBackendType::Synthetic
            }
            fn enumerate_sources(&self) -> BackendResult<Vec<SourceInfo>> {
                Ok(Vec::new())
            }
            fn open_reader(
                &self,
                source: &SourceInfo,
                _sink: Option<Arc<dyn SampleSink>>,
            ) -> BackendResult<Box<dyn NativeReader>> {
                Err(BackendError::DeviceNotFound(source.id.clone()))
            }
            fn watch_device_changes(&self, _notifier: HotplugNotifier) -> Option<Box<dyn HotplugWatch>> {
                self.watches.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                Some(Box::new(NoopWatch))
            }
        }

        let backend = Arc::new(SlowWatchBackend::default());
        let registry = HotplugRegistry::new();
        let barrier = Arc::new(Barrier::new(8));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let backend = backend.clone();
                let registry = registry.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.register(backend.as_ref())
                })
            })
            .collect();
        let registrations: Vec<HotplugRegistration> =
            threads.into_iter().map(|t| t.join().unwrap()).collect();

        assert_eq!(backend.watches.load(Ordering::SeqCst), 1);
        assert_eq!(registry.registration_count(), 8);
        assert!(registry.is_watching());

        drop(registrations);
        assert!(!registry.is_watching());
    }

    #[test]
    fn test_backend_events_reach_registrations() {
        let backend = SyntheticBackend::new();
        let registry = HotplugRegistry::new();
        let registration = registry.register(&backend);
        registration.take_pending();

        backend.trigger_hotplug();
        assert!(registration.take_pending());
    }
}
