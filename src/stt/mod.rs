//! Speech-to-text for spoken questions.
//!
//! A recorded question is peak-normalised, transcribed with NVIDIA Parakeet
//! TDT and parked in a [`PendingAudioQuestion`] slot. The next call to
//! [`crate::chat::ChatEngine::predict`] consumes the slot in place of the
//! typed message.

use crate::config::SttConfig;
use crate::error::{ChatError, Result};
use crate::models::ModelStore;
use parakeet_rs::{ParakeetTDT, TimestampMode, Transcriber as _};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info};

/// Converts mono PCM samples into text.
pub trait Transcriber: Send {
    /// Transcribe `samples` recorded at `sample_rate` Hz.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded or inference fails.
    fn transcribe(&mut self, samples: &[f32], sample_rate: u32) -> Result<String>;
}

/// Model files required by Parakeet TDT.
const ENCODER_ONNX: &str = "encoder-model.onnx";
const ENCODER_DATA: &str = "encoder-model.onnx.data";
const DECODER_ONNX: &str = "decoder_joint-model.onnx";
const VOCAB_TXT: &str = "vocab.txt";

/// Parakeet TDT speech-to-text engine, loaded lazily on first use.
pub struct ParakeetStt {
    model: Option<ParakeetTDT>,
    model_id: String,
    store: ModelStore,
}

impl ParakeetStt {
    pub fn new(config: &SttConfig, store: ModelStore) -> Self {
        info!("STT configured with model: {}", config.model_id);
        Self {
            model: None,
            model_id: config.model_id.clone(),
            store,
        }
    }

    /// Load the model now instead of on the first transcription.
    ///
    /// # Errors
    ///
    /// Returns an error if model download or loading fails.
    pub fn ensure_loaded(&mut self) -> Result<()> {
        if self.model.is_none() {
            self.initialize()?;
        }
        Ok(())
    }

    fn initialize(&mut self) -> Result<()> {
        info!("loading STT model: {}", self.model_id);
        let repo_dir = self.store.get_repo_dir(
            &self.model_id,
            &[ENCODER_ONNX, ENCODER_DATA, DECODER_ONNX, VOCAB_TXT],
        )?;
        let model = ParakeetTDT::from_pretrained(&repo_dir, None)
            .map_err(|e| ChatError::Stt(format!("failed to load Parakeet TDT: {e}")))?;
        info!("STT model loaded");
        self.model = Some(model);
        Ok(())
    }
}

impl Transcriber for ParakeetStt {
    fn transcribe(&mut self, samples: &[f32], sample_rate: u32) -> Result<String> {
        self.ensure_loaded()?;
        let model = self
            .model
            .as_mut()
            .ok_or_else(|| ChatError::Stt("model not initialized".into()))?;

        let start = Instant::now();
        let result = model
            .transcribe_samples(
                samples.to_vec(),
                sample_rate,
                1,
                Some(TimestampMode::Sentences),
            )
            .map_err(|e| ChatError::Stt(format!("transcription failed: {e}")))?;
        info!(
            "transcribed {:.1}s of audio in {}ms: \"{}\"",
            samples.len() as f32 / sample_rate.max(1) as f32,
            start.elapsed().as_millis(),
            result.text
        );
        Ok(result.text)
    }
}

/// Scale `samples` so the loudest one has magnitude 1.0.
///
/// Silence (all zeros) is left untouched.
pub fn normalize_peak(samples: &mut [f32]) {
    let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
    if peak <= f32::EPSILON {
        return;
    }
    for s in samples.iter_mut() {
        *s /= peak;
    }
}

/// Read a WAV file into mono `f32` samples and its sample rate.
///
/// Multi-channel audio is averaged per frame. Integer PCM is scaled to
/// `[-1.0, 1.0]`.
///
/// # Errors
///
/// Returns [`ChatError::Stt`] if the file cannot be opened or decoded.
pub fn read_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| ChatError::Stt(format!("cannot open {}: {e}", path.display())))?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| ChatError::Stt(format!("bad WAV data: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| ChatError::Stt(format!("bad WAV data: {e}")))?
        }
    };

    let channels = usize::from(spec.channels.max(1));
    let mono = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };
    debug!(
        "read {} mono samples at {} Hz from {}",
        mono.len(),
        spec.sample_rate,
        path.display()
    );
    Ok((mono, spec.sample_rate))
}

/// One-shot slot holding the transcription of the latest spoken question.
///
/// Cloning shares the slot.
#[derive(Debug, Clone, Default)]
pub struct PendingAudioQuestion {
    inner: Arc<Mutex<Option<String>>>,
}

impl PendingAudioQuestion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pending question.
    pub fn set(&self, text: String) {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        *guard = Some(text);
    }

    /// Remove and return the pending question if it has any non-blank text.
    pub fn take(&self) -> Option<String> {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.take().filter(|t| !t.trim().is_empty())
    }
}

/// Normalise and transcribe `samples`, then park the text in `pending`.
///
/// Returns the transcription.
///
/// # Errors
///
/// Returns the transcriber's error; `pending` is left unchanged.
pub fn transcribe_into(
    stt: &mut dyn Transcriber,
    mut samples: Vec<f32>,
    sample_rate: u32,
    pending: &PendingAudioQuestion,
) -> Result<String> {
    normalize_peak(&mut samples);
    let text = stt.transcribe(&samples, sample_rate)?;
    let text = text.trim().to_owned();
    pending.set(text.clone());
    Ok(text)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    struct FixedTranscriber {
        text: &'static str,
        last_peak: f32,
    }

    impl Transcriber for FixedTranscriber {
        fn transcribe(&mut self, samples: &[f32], _sample_rate: u32) -> Result<String> {
            self.last_peak = samples.iter().map(|s| s.abs()).fold(0.0, f32::max);
            Ok(self.text.to_owned())
        }
    }

    struct BrokenTranscriber;

    impl Transcriber for BrokenTranscriber {
        fn transcribe(&mut self, _samples: &[f32], _sample_rate: u32) -> Result<String> {
            Err(ChatError::Stt("boom".into()))
        }
    }

    #[test]
    fn normalize_scales_to_unit_peak() {
        let mut samples = vec![0.1, -0.5, 0.25];
        normalize_peak(&mut samples);
        assert!((samples[1] + 1.0).abs() < 1e-6);
        assert!((samples[0] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_silence_alone() {
        let mut samples = vec![0.0; 8];
        normalize_peak(&mut samples);
        assert!(samples.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn pending_question_is_taken_once() {
        let pending = PendingAudioQuestion::new();
        pending.set("Qu'est-ce que le moi ?".into());
        assert_eq!(pending.take().as_deref(), Some("Qu'est-ce que le moi ?"));
        assert!(pending.take().is_none());
    }

    #[test]
    fn blank_transcription_is_not_pending() {
        let pending = PendingAudioQuestion::new();
        pending.set("   ".into());
        assert!(pending.take().is_none());
    }

    #[test]
    fn transcribe_into_normalises_and_fills_slot() {
        let pending = PendingAudioQuestion::new();
        let mut stt = FixedTranscriber {
            text: " hello ",
            last_peak: 0.0,
        };
        let text = transcribe_into(&mut stt, vec![0.0, 0.2, -0.1], 16_000, &pending).unwrap();
        assert_eq!(text, "hello");
        assert!((stt.last_peak - 1.0).abs() < 1e-6);
        assert_eq!(pending.take().as_deref(), Some("hello"));
    }

    #[test]
    fn failed_transcription_keeps_slot_empty() {
        let pending = PendingAudioQuestion::new();
        let err = transcribe_into(&mut BrokenTranscriber, vec![0.5], 16_000, &pending);
        assert!(matches!(err, Err(ChatError::Stt(_))));
        assert!(pending.take().is_none());
    }

    #[test]
    fn read_wav_mixes_stereo_down() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..4 {
            writer.write_sample(16_384_i16).unwrap();
            writer.write_sample(0_i16).unwrap();
        }
        writer.finalize().unwrap();

        let (samples, rate) = read_wav(&path).unwrap();
        assert_eq!(rate, 16_000);
        assert_eq!(samples.len(), 4);
        assert!(samples.iter().all(|s| (s - 0.25).abs() < 1e-4));
    }

    #[test]
    fn read_wav_reports_missing_file() {
        let err = read_wav(Path::new("/nonexistent/question.wav"));
        assert!(matches!(err, Err(ChatError::Stt(_))));
    }
}
