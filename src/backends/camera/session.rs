// SPDX-License-Identifier: GPL-3.0-only

//! Per-device capture session
//!
//! A session owns one native reader while capturing and keeps a single
//! "latest sample" slot filled from the backend's delivery thread. The
//! application thread copies out of that slot with [`CaptureSession::fetch_latest`].
//!
//! Every delivery re-issues the next read request, so once started the
//! stream sustains itself until [`CaptureSession::stop`] or a stream
//! failure. All state lives behind one mutex shared by the public methods
//! and the delivery callback; reader teardown happens inside that lock.

use super::{
    CaptureBackend, NativeMediaDescriptor, NativeReader, SampleDelivery, SampleSink,
    SourceInfo,
};
use crate::constants::TICKS_PER_SECOND;
use crate::errors::{FetchError, SessionError};
use crate::media::PixelBuffer;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, trace, warn};

/// Log a size mismatch on the first drop and then every this many drops
const MISMATCH_LOG_INTERVAL: u64 = 100;

/// Sequence number and timestamp of a fetched sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    /// Samples delivered since the session started (first sample is 1)
    pub sequence: u32,
    /// Backend timestamp in 100 ns ticks
    pub timestamp_ticks: i64,
}

impl SampleInfo {
    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp_ticks as f64 / TICKS_PER_SECOND as f64
    }
}

#[derive(Default)]
struct SessionState {
    reader: Option<Box<dyn NativeReader>>,
    /// Bumped on every start and stop; stale sinks compare against it
    epoch: u64,
    pending: Option<PixelBuffer>,
    sequence: u32,
    timestamp: i64,
    dropped: u64,
}

impl SessionState {
    fn is_capturing(&self) -> bool {
        self.reader.is_some()
    }
}

/// Capture channel for one source
pub struct CaptureSession {
    backend: Arc<dyn CaptureBackend>,
    source: SourceInfo,
    descriptors: Vec<NativeMediaDescriptor>,
    shared: Arc<Mutex<SessionState>>,
}

impl CaptureSession {
    /// Create an idle session and enumerate the source's native descriptors
    pub fn new(backend: Arc<dyn CaptureBackend>, source: SourceInfo) -> Self {
        let descriptors = Self::list_supported_descriptors(backend.as_ref(), &source);
        debug!(
            device = %source.id,
            count = descriptors.len(),
            "Enumerated native descriptors"
        );
        Self {
            backend,
            source,
            descriptors,
            shared: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    /// Query every native descriptor through a transient reader
    ///
    /// Returns an empty list if the reader cannot be opened.
    pub fn list_supported_descriptors(
        backend: &dyn CaptureBackend,
        source: &SourceInfo,
    ) -> Vec<NativeMediaDescriptor> {
        let reader = match backend.open_reader(source, None) {
            Ok(reader) => reader,
            Err(e) => {
                warn!(device = %source.id, error = %e, "Failed to open reader for enumeration");
                return Vec::new();
            }
        };

        let mut descriptors = Vec::new();
        while let Some(descriptor) = reader.native_descriptor(descriptors.len()) {
            trace!(device = %source.id, index = descriptors.len(), %descriptor, "Native descriptor");
            descriptors.push(descriptor);
        }
        descriptors
    }

    pub fn source(&self) -> &SourceInfo {
        &self.source
    }

    pub fn descriptors(&self) -> &[NativeMediaDescriptor] {
        &self.descriptors
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a reader on the descriptor at `index` and request the first sample
    ///
    /// On failure the session stays idle and any opened reader is closed.
    pub fn start(&self, index: usize) -> Result<(), SessionError> {
        let mut state = self.lock();
        if state.is_capturing() {
            return Err(SessionError::AlreadyCapturing);
        }
        if index >= self.descriptors.len() {
            return Err(SessionError::InvalidDescriptor {
                index,
                count: self.descriptors.len(),
            });
        }

        state.epoch = state.epoch.wrapping_add(1);
        let sink: Arc<dyn SampleSink> = Arc::new(SessionSink {
            state: Arc::downgrade(&self.shared),
            epoch: state.epoch,
            device: self.source.id.clone(),
        });

        let mut reader = self.backend.open_reader(&self.source, Some(sink))?;
        reader.set_current_format(index)?;

        state.pending = None;
        state.sequence = 0;
        state.timestamp = 0;
        state.dropped = 0;

        reader.request_next_sample()?;
        state.reader = Some(reader);

        info!(
            device = %self.source.id,
            index,
            descriptor = %self.descriptors[index],
            "Capture session started"
        );
        Ok(())
    }

    /// Copy the latest sample into `output`
    ///
    /// `FetchError::NoFrame` right after `start` is the normal state until
    /// the first delivery completes.
    pub fn fetch_latest(&self, output: &mut PixelBuffer) -> Result<SampleInfo, FetchError> {
        let state = self.lock();
        let pending = state.pending.as_ref().ok_or(FetchError::NoFrame)?;
        if pending.len() != output.len() {
            return Err(FetchError::SizeMismatch {
                expected: pending.len(),
                actual: output.len(),
            });
        }
        output.as_mut_slice().copy_from_slice(pending.as_slice());
        Ok(SampleInfo {
            sequence: state.sequence,
            timestamp_ticks: state.timestamp,
        })
    }

    /// Release the reader and the pending sample; no-op when idle
    pub fn stop(&self) {
        let mut state = self.lock();
        let Some(reader) = state.reader.take() else {
            return;
        };
        state.epoch = state.epoch.wrapping_add(1);
        state.pending = None;
        // Closed while locked so no delivery can observe a half torn-down session
        drop(reader);
        info!(device = %self.source.id, sequence = state.sequence, "Capture session stopped");
    }

    pub fn is_capturing(&self) -> bool {
        self.lock().is_capturing()
    }

    /// Samples discarded because their size no longer matched
    pub fn dropped_samples(&self) -> u64 {
        self.lock().dropped
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Delivery target handed to the backend for one start/stop cycle
struct SessionSink {
    state: Weak<Mutex<SessionState>>,
    epoch: u64,
    device: String,
}

impl SampleSink for SessionSink {
    fn on_sample(&self, delivery: SampleDelivery<'_>) {
        let Some(shared) = self.state.upgrade() else {
            return;
        };
        let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
        if state.epoch != self.epoch || !state.is_capturing() {
            trace!(device = %self.device, "Ignoring delivery for a closed session");
            return;
        }

        match delivery {
            SampleDelivery::Failed(e) => {
                warn!(device = %self.device, error = %e, "Sample delivery failed, stream halted");
                return;
            }
            SampleDelivery::Empty => {
                trace!(device = %self.device, "Empty sample delivery");
            }
            SampleDelivery::Sample { timestamp, data } => {
                let pending = state
                    .pending
                    .get_or_insert_with(|| PixelBuffer::new(data.len()));
                if pending.len() != data.len() {
                    let expected = pending.len();
                    state.dropped += 1;
                    if state.dropped % MISMATCH_LOG_INTERVAL == 1 {
                        warn!(
                            device = %self.device,
                            expected,
                            actual = data.len(),
                            dropped = state.dropped,
                            "Sample size mismatch, dropping sample"
                        );
                    }
                } else {
                    pending.as_mut_slice().copy_from_slice(data);
                    state.sequence = state.sequence.wrapping_add(1);
                    state.timestamp = timestamp;
                    trace!(device = %self.device, sequence = state.sequence, timestamp, "Sample stored");
                }
            }
        }

        if let Some(reader) = state.reader.as_mut() {
            if let Err(e) = reader.request_next_sample() {
                warn!(device = %self.device, error = %e, "Failed to request next sample");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::{BackendError, FourCc, SyntheticBackend};

    fn descriptor(width: u32, height: u32) -> NativeMediaDescriptor {
        NativeMediaDescriptor {
            width,
            height,
            stride: (width * 2) as i32,
            frame_rate: 30,
            fourcc: FourCc::YUYV,
        }
    }

    fn setup() -> (Arc<SyntheticBackend>, CaptureSession) {
        let backend = Arc::new(SyntheticBackend::new());
        backend.add_source("Cam", "cam0", vec![descriptor(2, 2), descriptor(4, 2)]);
        let source = SourceInfo::new("Cam", "cam0");
        let session = CaptureSession::new(backend.clone(), source);
        (backend, session)
    }

    #[test]
    fn test_enumeration_uses_transient_reader() {
        let (backend, session) = setup();
        assert_eq!(session.descriptors().len(), 2);
        assert_eq!(backend.open_reader_count(), 0);
        assert!(!session.is_capturing());
    }

    #[test]
    fn test_enumeration_open_failure_yields_empty_list() {
        let backend = Arc::new(SyntheticBackend::new());
        backend.add_source("Cam", "cam0", vec![descriptor(2, 2)]);
        backend.set_open_failure("cam0", true);
        let session = CaptureSession::new(backend, SourceInfo::new("Cam", "cam0"));
        assert!(session.descriptors().is_empty());
    }

    #[test]
    fn test_fetch_before_first_delivery() {
        let (backend, session) = setup();
        session.start(0).unwrap();
        assert!(session.is_capturing());

        let mut out = PixelBuffer::new(8);
        assert_eq!(session.fetch_latest(&mut out), Err(FetchError::NoFrame));

        assert!(backend.deliver("cam0", 10_000_000, &[7; 8]));
        let info = session.fetch_latest(&mut out).unwrap();
        assert_eq!(info.sequence, 1);
        assert_eq!(info.timestamp_secs(), 1.0);
        assert_eq!(out.as_slice(), &[7; 8]);
    }

    #[test]
    fn test_sequence_counts_each_delivery_and_resets() {
        let (backend, session) = setup();
        session.start(0).unwrap();
        let mut out = PixelBuffer::new(8);

        for expected in 1..=5u32 {
            assert!(backend.deliver("cam0", expected as i64, &[expected as u8; 8]));
            assert_eq!(session.fetch_latest(&mut out).unwrap().sequence, expected);
        }

        session.stop();
        assert_eq!(session.fetch_latest(&mut out), Err(FetchError::NoFrame));

        session.start(1).unwrap();
        assert!(backend.deliver("cam0", 0, &[1; 16]));
        let mut wide = PixelBuffer::new(16);
        assert_eq!(session.fetch_latest(&mut wide).unwrap().sequence, 1);
    }

    #[test]
    fn test_size_mismatch_dropped_and_stream_continues() {
        let (backend, session) = setup();
        session.start(0).unwrap();
        let mut out = PixelBuffer::new(8);

        assert!(backend.deliver("cam0", 1, &[1; 8]));
        assert!(backend.deliver("cam0", 2, &[2; 12]));
        assert_eq!(session.dropped_samples(), 1);
        assert_eq!(session.fetch_latest(&mut out).unwrap().sequence, 1);
        assert_eq!(out.as_slice(), &[1; 8]);

        // Still requesting after a drop
        assert!(backend.deliver("cam0", 3, &[3; 8]));
        assert_eq!(session.fetch_latest(&mut out).unwrap().sequence, 2);
    }

    #[test]
    fn test_fetch_into_wrong_size_buffer() {
        let (backend, session) = setup();
        session.start(0).unwrap();
        backend.deliver("cam0", 1, &[1; 8]);

        let mut out = PixelBuffer::new(4);
        assert_eq!(
            session.fetch_latest(&mut out),
            Err(FetchError::SizeMismatch {
                expected: 8,
                actual: 4
            })
        );
    }

    #[test]
    fn test_empty_delivery_rerequests() {
        let (backend, session) = setup();
        session.start(0).unwrap();
        assert!(backend.deliver_empty("cam0"));
        assert!(backend.deliver("cam0", 1, &[1; 8]));
        let mut out = PixelBuffer::new(8);
        assert_eq!(session.fetch_latest(&mut out).unwrap().sequence, 1);
    }

    #[test]
    fn test_failure_halts_stream() {
        let (backend, session) = setup();
        session.start(0).unwrap();
        assert!(backend.deliver_failure("cam0", BackendError::StreamFailed("unplugged".into())));

        // No request outstanding after a failure
        assert!(!backend.deliver("cam0", 1, &[1; 8]));
        assert!(session.is_capturing());
    }

    #[test]
    fn test_start_errors() {
        let (backend, session) = setup();
        assert!(matches!(
            session.start(2),
            Err(SessionError::InvalidDescriptor { index: 2, count: 2 })
        ));

        session.start(0).unwrap();
        assert!(matches!(session.start(1), Err(SessionError::AlreadyCapturing)));
        session.stop();

        backend.set_format_failure("cam0", true);
        assert!(matches!(session.start(0), Err(SessionError::Backend(_))));
        assert!(!session.is_capturing());
        assert_eq!(backend.open_reader_count(), 0);
    }

    #[test]
    fn test_stop_closes_reader_and_ignores_late_sinks() {
        let (backend, session) = setup();
        session.start(0).unwrap();
        assert_eq!(backend.open_reader_count(), 1);

        session.stop();
        session.stop();
        assert_eq!(backend.open_reader_count(), 0);
        assert!(!backend.deliver("cam0", 1, &[1; 8]));
    }

    #[test]
    fn test_delivery_from_another_thread() {
        let (backend, session) = setup();
        session.start(0).unwrap();

        let producer = {
            let backend = backend.clone();
            std::thread::spawn(move || {
                let mut delivered = 0;
                while delivered < 20 {
                    if backend.deliver("cam0", delivered, &[delivered as u8; 8]) {
                        delivered += 1;
                    } else {
                        std::thread::yield_now();
                    }
                }
            })
        };
        producer.join().unwrap();

        let mut out = PixelBuffer::new(8);
        assert_eq!(session.fetch_latest(&mut out).unwrap().sequence, 20);
    }

    #[test]
    fn test_restarts_race_with_deliveries() {
        use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

        let (backend, session) = setup();
        let running = Arc::new(AtomicBool::new(true));
        let delivered = Arc::new(AtomicU64::new(0));

        let producer = {
            let backend = backend.clone();
            let running = running.clone();
            let delivered = delivered.clone();
            std::thread::spawn(move || {
                let mut timestamp = 0;
                while running.load(Ordering::SeqCst) {
                    timestamp += 1;
                    if backend.deliver("cam0", timestamp, &[timestamp as u8; 8]) {
                        delivered.fetch_add(1, Ordering::SeqCst);
                    } else {
                        std::thread::yield_now();
                    }
                }
            })
        };

        let mut out = PixelBuffer::new(8);
        for _ in 0..500 {
            session.start(0).unwrap();
            let mut last = 0;
            for _ in 0..8 {
                match session.fetch_latest(&mut out) {
                    Ok(info) => {
                        assert!(info.sequence >= last, "sequence went backwards");
                        last = info.sequence;
                    }
                    Err(FetchError::NoFrame) => {}
                    Err(e) => panic!("unexpected fetch error: {}", e),
                }
                std::thread::yield_now();
            }
            session.stop();
            assert_eq!(session.fetch_latest(&mut out), Err(FetchError::NoFrame));
        }

        // The stream still flows after all the restarts
        session.start(0).unwrap();
        while session.fetch_latest(&mut out).is_err() {
            std::thread::yield_now();
        }
        session.stop();

        running.store(false, Ordering::SeqCst);
        producer.join().unwrap();
        assert!(delivered.load(Ordering::SeqCst) > 0);
        assert_eq!(backend.open_reader_count(), 0);
        assert_eq!(session.dropped_samples(), 0);
    }
}
