//! Generation Settings
//!
//! Sampling parameters attached to a generation request at submission
//! time. Immutable for the lifetime of an in-flight operation; the
//! generation client serializes the whole struct onto the wire.

use serde::{Deserialize, Serialize};

/// Sampling parameters for the text generation backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    /// Maximum number of tokens to generate.
    pub max_new_tokens: u32,
    /// Whether to sample (vs. greedy decoding).
    pub do_sample: bool,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling cutoff.
    pub top_p: f32,
    /// Typical sampling parameter.
    pub typical_p: f32,
    /// Repetition penalty multiplier.
    pub repetition_penalty: f32,
    /// Top-k sampling cutoff (0 = disabled).
    pub top_k: u32,
    /// Minimum response length in tokens.
    pub min_length: u32,
    /// N-gram size banned from repeating (0 = disabled).
    pub no_repeat_ngram_size: u32,
    /// Beam count for beam search.
    pub num_beams: u32,
    /// Contrastive search penalty alpha.
    pub penalty_alpha: f32,
    /// Length penalty for beam search.
    pub length_penalty: f32,
    /// Stop beams early when all are finished.
    pub early_stopping: bool,
    /// Prepend the beginning-of-sequence token.
    pub add_bos_token: bool,
    /// Context window truncation length.
    pub truncation_length: u32,
    /// Prevent the end-of-sequence token from being generated.
    pub ban_eos_token: bool,
    /// Strip special tokens from the decoded output.
    pub skip_special_tokens: bool,
    /// Strings that terminate generation when produced.
    pub stopping_strings: Vec<String>,
}

impl GenerationSettings {
    /// Defaults tuned for LLaMA-family models.
    #[must_use]
    pub fn llama_defaults() -> Self {
        Self {
            max_new_tokens: 100,
            do_sample: true,
            temperature: 0.75,
            top_p: 0.73,
            typical_p: 1.0,
            repetition_penalty: 1.18,
            top_k: 40,
            min_length: 0,
            no_repeat_ngram_size: 0,
            num_beams: 1,
            penalty_alpha: 0.0,
            length_penalty: 1.0,
            early_stopping: false,
            add_bos_token: true,
            truncation_length: 2048,
            ban_eos_token: false,
            skip_special_tokens: true,
            stopping_strings: Vec::new(),
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self::llama_defaults()
    }
}
