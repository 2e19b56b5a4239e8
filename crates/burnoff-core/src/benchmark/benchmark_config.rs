use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BurnoffError, Result};

pub const MAX_PROMPT_CHARS: usize = 4096;
pub const MAX_TOKENS_LIMIT: u32 = 2048;
pub const MAX_TEMPERATURE: f32 = 2.0;
pub const MAX_ITERATIONS: u32 = 100;
pub const MAX_CONTEXT_LENGTH: u32 = 131_072;

/// One benchmark request, shared verbatim by every backend in the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub iterations: u32,
    #[serde(rename = "iteration_delay_ms", with = "duration_ms")]
    pub iteration_delay: Duration,
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    pub use_gpu: bool,
    pub context_length: u32,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            prompt: "Explain the theory of relativity in simple terms.".to_string(),
            max_tokens: 100,
            temperature: 0.7,
            iterations: 3,
            iteration_delay: Duration::from_millis(1000),
            model_path: None,
            use_gpu: true,
            context_length: 2048,
        }
    }
}

impl BenchmarkConfig {
    /// Reject out-of-range values before any backend is touched.
    pub fn validate(&self) -> Result<()> {
        let prompt_chars = self.prompt.chars().count();
        if prompt_chars == 0 || prompt_chars > MAX_PROMPT_CHARS {
            return Err(BurnoffError::InvalidConfig(format!(
                "prompt must be 1..={} characters, got {}",
                MAX_PROMPT_CHARS, prompt_chars
            )));
        }

        if self.max_tokens == 0 || self.max_tokens > MAX_TOKENS_LIMIT {
            return Err(BurnoffError::InvalidConfig(format!(
                "max_tokens must be 1..={}, got {}",
                MAX_TOKENS_LIMIT, self.max_tokens
            )));
        }

        if !self.temperature.is_finite() || !(0.0..=MAX_TEMPERATURE).contains(&self.temperature) {
            return Err(BurnoffError::InvalidConfig(format!(
                "temperature must be 0.0..={:.1}, got {}",
                MAX_TEMPERATURE, self.temperature
            )));
        }

        if self.iterations == 0 || self.iterations > MAX_ITERATIONS {
            return Err(BurnoffError::InvalidConfig(format!(
                "iterations must be 1..={}, got {}",
                MAX_ITERATIONS, self.iterations
            )));
        }

        if self.context_length == 0 || self.context_length > MAX_CONTEXT_LENGTH {
            return Err(BurnoffError::InvalidConfig(format!(
                "context_length must be 1..={}, got {}",
                MAX_CONTEXT_LENGTH, self.context_length
            )));
        }

        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
