//! Whisper adapter for the recognizer backend traits.
//!
//! Whisper is not a streaming model, so a stream here buffers audio and
//! `decode` reruns a full greedy pass over everything buffered so far. The
//! hypothesis therefore improves as the utterance grows.
//!
//! # Feature Gate
//!
//! The real adapter requires the `whisper` feature and cmake:
//!
//! ```bash
//! cargo build --features whisper
//! ```
//!
//! Without it [`WhisperBackend`] still validates the fingerprint and the
//! model path, then refuses to load.

use crate::defaults;
use crate::error::{Result, VoxholdError};
use crate::recognizer::backend::{InferenceBackend, ModelHandle};
use crate::recognizer::fingerprint::ConfigFingerprint;
use std::path::PathBuf;

#[cfg(feature = "whisper")]
use crate::recognizer::backend::StreamHandle;
#[cfg(feature = "whisper")]
use std::sync::{Arc, Once};
#[cfg(feature = "whisper")]
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Whisper only accepts 16kHz mono input.
pub const WHISPER_SAMPLE_RATE: u32 = 16000;

/// Parameters extracted from a fingerprint for one whisper model.
#[derive(Debug, Clone, PartialEq)]
pub struct WhisperParams {
    pub model_path: PathBuf,
    /// Language code, or `None` for automatic detection
    pub language: Option<String>,
    pub threads: u32,
}

impl WhisperParams {
    /// Validate `fingerprint` and pull out what whisper needs.
    ///
    /// # Errors
    /// `ModelLoad` when the fingerprint names no model file or a sample rate
    /// whisper cannot run at, `ModelNotFound` when the model file is missing.
    pub fn from_fingerprint(fingerprint: &ConfigFingerprint) -> Result<Self> {
        let model_path = fingerprint
            .model_file(defaults::MODEL_FILE_ROLE)
            .ok_or_else(|| VoxholdError::ModelLoad {
                backend: fingerprint.backend().to_string(),
                message: format!(
                    "no \"{}\" entry in model_files",
                    defaults::MODEL_FILE_ROLE
                ),
            })?
            .to_path_buf();

        if fingerprint.sample_rate() != WHISPER_SAMPLE_RATE {
            return Err(VoxholdError::ModelLoad {
                backend: fingerprint.backend().to_string(),
                message: format!(
                    "whisper runs at {} Hz, fingerprint asks for {} Hz",
                    WHISPER_SAMPLE_RATE,
                    fingerprint.sample_rate()
                ),
            });
        }

        if !model_path.exists() {
            return Err(VoxholdError::ModelNotFound {
                path: model_path.to_string_lossy().to_string(),
            });
        }

        let language = match fingerprint.text_flag("language") {
            None | Some(defaults::AUTO_LANGUAGE) | Some("") => None,
            Some(code) => Some(code.to_string()),
        };

        Ok(Self {
            model_path,
            language,
            threads: fingerprint.num_threads().max(1),
        })
    }
}

/// Longest stretch of audio whisper looks at in one pass (30s at 16kHz).
pub const WHISPER_WINDOW_SAMPLES: usize = 30 * WHISPER_SAMPLE_RATE as usize;

/// Audio accumulated by one stream, with a watermark of what has been
/// decoded already.
///
/// Streams are meant for single utterances. The buffer keeps at most the
/// last [`WHISPER_WINDOW_SAMPLES`]; older audio is dropped, so a decode never
/// covers more than one whisper window.
#[derive(Debug, Default)]
pub struct SampleBuffer {
    samples: Vec<f32>,
    decoded_upto: usize,
}

impl SampleBuffer {
    pub fn push(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
        if sample_rate != WHISPER_SAMPLE_RATE {
            return Err(VoxholdError::SampleRateMismatch {
                expected: WHISPER_SAMPLE_RATE,
                actual: sample_rate,
            });
        }
        self.samples.extend_from_slice(samples);
        if self.samples.len() > WHISPER_WINDOW_SAMPLES {
            let excess = self.samples.len() - WHISPER_WINDOW_SAMPLES;
            self.samples.drain(..excess);
            self.decoded_upto = self.decoded_upto.saturating_sub(excess);
        }
        Ok(())
    }

    /// Samples received since the last decode.
    pub fn undecoded(&self) -> usize {
        self.samples.len() - self.decoded_upto
    }

    pub fn is_ready(&self) -> bool {
        self.undecoded() >= defaults::STREAM_READY_SAMPLES
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn mark_decoded(&mut self) {
        self.decoded_upto = self.samples.len();
    }
}

/// Backend that loads ggml whisper models through whisper-rs.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhisperBackend;

impl WhisperBackend {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "whisper")]
impl InferenceBackend for WhisperBackend {
    fn name(&self) -> &str {
        "whisper"
    }

    fn load_model(&self, fingerprint: &ConfigFingerprint) -> Result<Box<dyn ModelHandle>> {
        // Route whisper.cpp's own output through whisper-rs instead of stderr
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        let params = WhisperParams::from_fingerprint(fingerprint)?;
        let path = params
            .model_path
            .to_str()
            .ok_or_else(|| VoxholdError::ModelLoad {
                backend: self.name().to_string(),
                message: "Invalid UTF-8 in model path".to_string(),
            })?;

        let mut context_params = WhisperContextParameters::default();
        // Fused attention kernels avoid the standalone softmax kernel that
        // crashes on sm_120 GPUs with ggml <= 1.7.6
        context_params.flash_attn(true);
        let context = WhisperContext::new_with_params(path, context_params).map_err(|e| {
            VoxholdError::ModelLoad {
                backend: self.name().to_string(),
                message: format!("Failed to load Whisper model: {}", e),
            }
        })?;

        tracing::debug!(model = %params.model_path.display(), threads = params.threads, "whisper context ready");

        Ok(Box::new(WhisperModel {
            context: Arc::new(context),
            params,
        }))
    }
}

#[cfg(not(feature = "whisper"))]
impl InferenceBackend for WhisperBackend {
    fn name(&self) -> &str {
        "whisper"
    }

    fn load_model(&self, fingerprint: &ConfigFingerprint) -> Result<Box<dyn ModelHandle>> {
        WhisperParams::from_fingerprint(fingerprint)?;
        Err(VoxholdError::ModelLoad {
            backend: self.name().to_string(),
            message: concat!(
                "Whisper feature not enabled. This build has no speech recognition.\n",
                "To fix: cargo build --features whisper\n",
                "If build fails with cmake errors, install: sudo apt install cmake"
            )
            .to_string(),
        })
    }
}

#[cfg(feature = "whisper")]
struct WhisperModel {
    context: Arc<WhisperContext>,
    params: WhisperParams,
}

#[cfg(feature = "whisper")]
impl ModelHandle for WhisperModel {
    fn create_stream(&mut self) -> Result<Box<dyn StreamHandle>> {
        Ok(Box::new(WhisperStream {
            context: Arc::clone(&self.context),
            params: self.params.clone(),
            buffer: SampleBuffer::default(),
            text: None,
        }))
    }
}

#[cfg(feature = "whisper")]
struct WhisperStream {
    context: Arc<WhisperContext>,
    params: WhisperParams,
    buffer: SampleBuffer,
    text: Option<String>,
}

#[cfg(feature = "whisper")]
impl WhisperStream {
    fn decode_error(message: String) -> VoxholdError {
        VoxholdError::StreamOperation {
            operation: "decode".to_string(),
            message,
        }
    }
}

#[cfg(feature = "whisper")]
impl StreamHandle for WhisperStream {
    fn accept_waveform(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
        self.buffer.push(samples, sample_rate)
    }

    fn is_ready(&mut self) -> Result<bool> {
        Ok(self.buffer.is_ready())
    }

    fn decode(&mut self) -> Result<()> {
        if self.buffer.undecoded() == 0 {
            return Ok(());
        }

        let mut state = self
            .context
            .create_state()
            .map_err(|e| Self::decode_error(format!("Failed to create Whisper state: {}", e)))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(self.params.language.as_deref());
        params.set_n_threads(self.params.threads as i32);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, self.buffer.samples())
            .map_err(|e| Self::decode_error(format!("Whisper inference failed: {}", e)))?;

        let mut transcription = String::new();
        for segment in state.as_iter() {
            transcription.push_str(&segment.to_string());
        }
        let transcription = transcription.trim();

        self.text = (!transcription.is_empty()).then(|| transcription.to_string());
        self.buffer.mark_decoded();
        Ok(())
    }

    fn result_text(&mut self) -> Result<Option<String>> {
        Ok(self.text.clone())
    }
}
