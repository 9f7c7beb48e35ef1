use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// `provider/model-name`
    pub model: String,
    pub data_dir: PathBuf,
    pub timeouts: TimeoutConfig,
    pub thresholds: ThresholdConfig,
    pub limits: LimitConfig,
}

/// Deadlines in milliseconds for each class of collaborator call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub format_ms: u64,
    /// Routing, evaluation and refinement calls.
    pub call_ms: u64,
    pub retrieval_ms: u64,
    pub generation_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Registry similarity required to accept a filename named in the query.
    pub explicit_match: f64,
    /// Registry similarity required when matching on broad key terms.
    pub broad_match: f64,
    /// Evaluator score (0-10) at or above which retrieval is good enough.
    pub quality_pass: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    pub max_refinements: u32,
    pub max_context_messages: usize,
    /// Below this many characters of rendered context, retrieval counts as empty.
    pub min_context_chars: usize,
    pub doc_snippet_chars: usize,
    pub max_history_messages: usize,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            format_ms: 10_000,
            call_ms: 30_000,
            retrieval_ms: 30_000,
            generation_ms: 60_000,
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            explicit_match: 0.75,
            broad_match: 0.15,
            quality_pass: 6.0,
        }
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_refinements: 2,
            max_context_messages: 3,
            min_context_chars: 50,
            doc_snippet_chars: 1500,
            max_history_messages: 50,
        }
    }
}

impl OrchestratorConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if !self.model.contains('/') {
            return Err("model must look like provider/model-name".into());
        }
        let t = &self.timeouts;
        if t.format_ms == 0 || t.call_ms == 0 || t.retrieval_ms == 0 || t.generation_ms == 0 {
            return Err("timeouts must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.thresholds.explicit_match) {
            return Err("thresholds.explicit_match must be in [0.0, 1.0]".into());
        }
        if !(0.0..=1.0).contains(&self.thresholds.broad_match) {
            return Err("thresholds.broad_match must be in [0.0, 1.0]".into());
        }
        if !(0.0..=10.0).contains(&self.thresholds.quality_pass) {
            return Err("thresholds.quality_pass must be in [0.0, 10.0]".into());
        }
        if self.limits.max_refinements == 0 {
            return Err("limits.max_refinements must be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ADAPTIVE_RAG_MODEL` and `ADAPTIVE_RAG_DATA_DIR` if set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(model) = std::env::var("ADAPTIVE_RAG_MODEL") {
            if !model.trim().is_empty() {
                self.model = model.trim().to_string();
            }
        }
        if let Ok(dir) = std::env::var("ADAPTIVE_RAG_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.data_dir = PathBuf::from(dir.trim());
            }
        }
        self
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("adaptive-rag");

        Self {
            model: "openai/gpt-4o-mini".to_string(),
            data_dir,
            timeouts: TimeoutConfig::default(),
            thresholds: ThresholdConfig::default(),
            limits: LimitConfig::default(),
        }
    }
}
