//! Vosk engine for the local backend

use super::local::{EngineResult, LocalEngine};
use crate::audio::SAMPLE_RATE;
use crate::error::{VoxError, VoxResult};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};
use vosk::{Model, Recognizer};

pub struct VoskEngine {
    model: Model,
    recognizer: Recognizer,
}

impl VoskEngine {
    /// Load the model. Recognition is open-vocabulary until a grammar is set.
    pub fn new(model_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            return Err(anyhow::anyhow!(
                "Vosk model not found at {}",
                model_path.display()
            ));
        }

        info!("Loading Vosk model from: {}", model_path.display());

        let model_str = model_path.to_str().ok_or_else(|| {
            anyhow::anyhow!(
                "Vosk model path is not valid UTF-8: {}",
                model_path.display()
            )
        })?;

        let model = Model::new(model_str).context("Failed to load Vosk model")?;
        let recognizer =
            Recognizer::new(&model, SAMPLE_RATE as f32).context("Failed to create Vosk recognizer")?;

        Ok(Self { model, recognizer })
    }
}

impl LocalEngine for VoskEngine {
    fn name(&self) -> &str {
        "vosk"
    }

    fn set_grammar(&mut self, phrases: &[String]) -> VoxResult<()> {
        let recognizer = Recognizer::new_with_grammar(&self.model, SAMPLE_RATE as f32, phrases)
            .ok_or_else(|| VoxError::EngineLoad("Vosk rejected the grammar".to_string()))?;
        self.recognizer = recognizer;
        self.recognizer.set_words(true);
        info!("⚙️ Using grammar ({} phrases)", phrases.len());
        Ok(())
    }

    fn process(&mut self, samples: &[i16]) -> VoxResult<Option<EngineResult>> {
        let state = self.recognizer.accept_waveform(samples);

        match state {
            vosk::DecodingState::Finalized => {
                let result = self.recognizer.final_result();
                if let Some(single) = result.single() {
                    if let Some(text) = extract_text(single.text) {
                        // Average word confidence
                        let confidence = if single.result.is_empty() {
                            1.0f32
                        } else {
                            let sum: f32 = single.result.iter().map(|w| w.conf).sum();
                            sum / single.result.len() as f32
                        };
                        return Ok(Some(EngineResult { text, confidence }));
                    }
                }
            }
            vosk::DecodingState::Running => {
                debug!("Partial: {}", self.recognizer.partial_result().partial);
            }
            vosk::DecodingState::Failed => {
                debug!("Decoding failed for this chunk");
            }
        }

        Ok(None)
    }

    fn reset(&mut self) {
        self.recognizer.reset();
    }
}

/// Extract text from Vosk result, filtering empty and unknown-only results
fn extract_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed == super::local::UNKNOWN_WORD {
        None
    } else {
        Some(trimmed.to_string())
    }
}
