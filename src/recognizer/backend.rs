//! Inference backend capability.
//!
//! The manager only ever talks to these three traits. How a concrete backend
//! binds to its library (static link, FFI, dynamic lookup) is the adapter's
//! business; see `stt::whisper` for the one shipped adapter.
//!
//! Releasing a model or stream is dropping its handle. The manager decides
//! *when* that happens and does it under its native-invocation lock.

use crate::defaults;
use crate::error::{Result, VoxholdError};
use crate::recognizer::fingerprint::ConfigFingerprint;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Factory for loaded models.
pub trait InferenceBackend: Send + Sync {
    /// Backend identifier used in logs and errors.
    fn name(&self) -> &str;

    /// Construct a model for `fingerprint`.
    ///
    /// May block on disk I/O; the manager calls it from a blocking thread.
    fn load_model(&self, fingerprint: &ConfigFingerprint) -> Result<Box<dyn ModelHandle>>;
}

/// One loaded model able to spawn recognition streams.
pub trait ModelHandle: Send {
    fn create_stream(&mut self) -> Result<Box<dyn StreamHandle>>;
}

/// Per-utterance recognition state.
pub trait StreamHandle: Send {
    /// Feed mono samples normalized to [-1.0, 1.0].
    fn accept_waveform(&mut self, samples: &[f32], sample_rate: u32) -> Result<()>;

    /// True when enough audio is buffered for `decode` to make progress.
    fn is_ready(&mut self) -> Result<bool>;

    fn decode(&mut self) -> Result<()>;

    /// Current hypothesis, `None` if nothing has been recognized yet.
    fn result_text(&mut self) -> Result<Option<String>>;
}

/// Shared counters and failure switches behind every [`MockBackend`] clone.
#[derive(Debug, Default)]
struct MockShared {
    loads: AtomicUsize,
    live_models: AtomicUsize,
    max_live_models: AtomicUsize,
    streams_created: AtomicUsize,
    live_streams: AtomicUsize,
    calls_in_flight: AtomicUsize,
    overlapping_calls: AtomicUsize,
    fail_load: AtomicBool,
    fail_stream: AtomicBool,
    fail_decode: AtomicBool,
    panic_decode: AtomicBool,
    loaded: Mutex<Vec<ConfigFingerprint>>,
}

impl MockShared {
    /// Mark entry into a native call; records overlap if another is running.
    fn enter(&self) -> CallGuard<'_> {
        if self.calls_in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapping_calls.fetch_add(1, Ordering::SeqCst);
        }
        CallGuard(self)
    }
}

struct CallGuard<'a>(&'a MockShared);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.calls_in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock backend for testing.
///
/// Clones share their counters, so a test can keep one clone for assertions
/// while the manager owns another.
#[derive(Debug, Clone)]
pub struct MockBackend {
    name: String,
    response: String,
    load_delay: Duration,
    decode_delay: Duration,
    shared: Arc<MockShared>,
}

impl MockBackend {
    /// Create a new mock backend with default settings
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            response: "mock transcription".to_string(),
            load_delay: Duration::ZERO,
            decode_delay: Duration::ZERO,
            shared: Arc::new(MockShared::default()),
        }
    }

    /// Configure the text returned after a successful decode
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Make every model load take `delay` (blocking sleep)
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Make every decode take `delay` (blocking sleep)
    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = delay;
        self
    }

    pub fn with_load_failure(self) -> Self {
        self.set_load_failure(true);
        self
    }

    pub fn with_stream_failure(self) -> Self {
        self.shared.fail_stream.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_decode_failure(self) -> Self {
        self.set_decode_failure(true);
        self
    }

    /// Make decode panic instead of returning an error
    pub fn with_decode_panic(self) -> Self {
        self.shared.panic_decode.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_load_failure(&self, fail: bool) {
        self.shared.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn set_stream_failure(&self, fail: bool) {
        self.shared.fail_stream.store(fail, Ordering::SeqCst);
    }

    pub fn set_decode_failure(&self, fail: bool) {
        self.shared.fail_decode.store(fail, Ordering::SeqCst);
    }

    /// Number of successful model loads
    pub fn loads(&self) -> usize {
        self.shared.loads.load(Ordering::SeqCst)
    }

    pub fn live_models(&self) -> usize {
        self.shared.live_models.load(Ordering::SeqCst)
    }

    /// Highest number of models ever alive at once
    pub fn max_live_models(&self) -> usize {
        self.shared.max_live_models.load(Ordering::SeqCst)
    }

    pub fn streams_created(&self) -> usize {
        self.shared.streams_created.load(Ordering::SeqCst)
    }

    pub fn live_streams(&self) -> usize {
        self.shared.live_streams.load(Ordering::SeqCst)
    }

    /// Number of backend calls that started while another was still running
    pub fn overlapping_calls(&self) -> usize {
        self.shared.overlapping_calls.load(Ordering::SeqCst)
    }

    /// Fingerprints of every successful load, oldest first
    pub fn loaded_fingerprints(&self) -> Vec<ConfigFingerprint> {
        self.shared
            .loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl InferenceBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_model(&self, fingerprint: &ConfigFingerprint) -> Result<Box<dyn ModelHandle>> {
        let _call = self.shared.enter();
        if !self.load_delay.is_zero() {
            std::thread::sleep(self.load_delay);
        }
        if self.shared.fail_load.load(Ordering::SeqCst) {
            return Err(VoxholdError::ModelLoad {
                backend: self.name.clone(),
                message: "mock load failure".to_string(),
            });
        }

        self.shared.loads.fetch_add(1, Ordering::SeqCst);
        let live = self.shared.live_models.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_live_models.fetch_max(live, Ordering::SeqCst);
        self.shared
            .loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fingerprint.clone());

        Ok(Box::new(MockModel {
            shared: Arc::clone(&self.shared),
            response: self.response.clone(),
            decode_delay: self.decode_delay,
            sample_rate: fingerprint.sample_rate(),
        }))
    }
}

struct MockModel {
    shared: Arc<MockShared>,
    response: String,
    decode_delay: Duration,
    sample_rate: u32,
}

impl ModelHandle for MockModel {
    fn create_stream(&mut self) -> Result<Box<dyn StreamHandle>> {
        let _call = self.shared.enter();
        if self.shared.fail_stream.load(Ordering::SeqCst) {
            return Err(VoxholdError::StreamCreate {
                message: "mock stream failure".to_string(),
            });
        }
        self.shared.streams_created.fetch_add(1, Ordering::SeqCst);
        self.shared.live_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStream {
            shared: Arc::clone(&self.shared),
            response: self.response.clone(),
            decode_delay: self.decode_delay,
            sample_rate: self.sample_rate,
            buffered: 0,
            decoded: false,
        }))
    }
}

impl Drop for MockModel {
    fn drop(&mut self) {
        let _call = self.shared.enter();
        self.shared.live_models.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MockStream {
    shared: Arc<MockShared>,
    response: String,
    decode_delay: Duration,
    sample_rate: u32,
    buffered: usize,
    decoded: bool,
}

impl StreamHandle for MockStream {
    fn accept_waveform(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
        let _call = self.shared.enter();
        if sample_rate != self.sample_rate {
            return Err(VoxholdError::SampleRateMismatch {
                expected: self.sample_rate,
                actual: sample_rate,
            });
        }
        self.buffered += samples.len();
        Ok(())
    }

    fn is_ready(&mut self) -> Result<bool> {
        let _call = self.shared.enter();
        Ok(self.buffered >= defaults::STREAM_READY_SAMPLES)
    }

    fn decode(&mut self) -> Result<()> {
        let _call = self.shared.enter();
        if !self.decode_delay.is_zero() {
            std::thread::sleep(self.decode_delay);
        }
        if self.shared.panic_decode.load(Ordering::SeqCst) {
            panic!("mock decode panic");
        }
        if self.shared.fail_decode.load(Ordering::SeqCst) {
            return Err(VoxholdError::StreamOperation {
                operation: "decode".to_string(),
                message: "mock decode failure".to_string(),
            });
        }
        self.buffered = 0;
        self.decoded = true;
        Ok(())
    }

    fn result_text(&mut self) -> Result<Option<String>> {
        let _call = self.shared.enter();
        if self.decoded && !self.response.is_empty() {
            Ok(Some(self.response.clone()))
        } else {
            Ok(None)
        }
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        let _call = self.shared.enter();
        self.shared.live_streams.fetch_sub(1, Ordering::SeqCst);
    }
}
