//! Embedding types and model registries.

use serde::{Deserialize, Serialize};

/// Backend variants the resilience controller can route a batch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Hosted embedding API (OpenAI-compatible endpoint)
    Remote,
    /// CPU-resident model (fastembed or Model2Vec)
    Local,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote => write!(f, "remote"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Operating mode of the resilience controller.
///
/// Parsed from `MODEL_FALLBACK_MODE`; both the long names and the short
/// aliases (`api`, `local`, `off`) are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperatingMode {
    /// Try the remote API, fall back to local after repeated failures
    #[default]
    Auto,
    /// Remote only, failures surface (no fallback)
    ApiOnly,
    /// Local only, the remote API is never called
    LocalOnly,
    /// Fallback disabled, remote failures propagate
    Disabled,
}

impl OperatingMode {
    /// Whether this mode may call the remote backend.
    #[must_use]
    pub const fn uses_remote(&self) -> bool {
        !matches!(self, Self::LocalOnly)
    }
}

impl std::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::ApiOnly => write!(f, "api-only"),
            Self::LocalOnly => write!(f, "local-only"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

impl std::str::FromStr for OperatingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "api" | "api-only" | "api_only" => Ok(Self::ApiOnly),
            "local" | "local-only" | "local_only" => Ok(Self::LocalOnly),
            "off" | "disabled" => Ok(Self::Disabled),
            _ => Err(format!("Unknown operating mode: {s}")),
        }
    }
}

/// Metadata describing a backend instance.
#[derive(Debug, Clone, Serialize)]
pub struct BackendInfo {
    pub kind: BackendKind,
    pub name: String,
    pub model: String,
    pub dimensions: usize,
}

/// Model configuration with output dimensions.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub name: String,
    pub dimensions: usize,
}

/// Remote (hosted API) model configurations.
pub mod remote_models {
    use super::ModelConfig;

    /// Default DeepInfra endpoint (OpenAI-compatible).
    pub const DEFAULT_ENDPOINT: &str = "https://api.deepinfra.com/v1/openai";

    pub fn gte_large() -> ModelConfig {
        ModelConfig {
            name: "thenlper/gte-large".to_string(),
            dimensions: 1024,
        }
    }

    pub fn bge_large_en_v1_5() -> ModelConfig {
        ModelConfig {
            name: "BAAI/bge-large-en-v1.5".to_string(),
            dimensions: 1024,
        }
    }

    pub fn bge_base_en_v1_5() -> ModelConfig {
        ModelConfig {
            name: "BAAI/bge-base-en-v1.5".to_string(),
            dimensions: 768,
        }
    }

    pub fn default_config() -> ModelConfig {
        bge_large_en_v1_5()
    }

    pub fn get_config(model: &str) -> ModelConfig {
        match model {
            "thenlper/gte-large" => gte_large(),
            "BAAI/bge-large-en-v1.5" => bge_large_en_v1_5(),
            "BAAI/bge-base-en-v1.5" => bge_base_en_v1_5(),
            _ => ModelConfig {
                name: model.to_string(),
                dimensions: 1024, // Default assumption
            },
        }
    }
}

/// Local CPU model configurations.
///
/// The default is the ONNX build of the remote default model, so auto mode
/// can switch backends mid-run without changing the vector space size.
/// Model2Vec static models are much faster but only fit `local-only` runs.
pub mod local_models {
    use super::ModelConfig;

    /// Runtime used to execute a local model.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum LocalEngine {
        /// ONNX transformer through fastembed
        FastEmbed,
        /// Model2Vec static embeddings
        Model2Vec,
    }

    /// bge-large-en-v1.5 - 1024d, same weights as the remote default
    pub fn bge_large_en_v1_5() -> ModelConfig {
        ModelConfig {
            name: "BAAI/bge-large-en-v1.5".to_string(),
            dimensions: 1024,
        }
    }

    /// bge-base-en-v1.5 - 768d
    pub fn bge_base_en_v1_5() -> ModelConfig {
        ModelConfig {
            name: "BAAI/bge-base-en-v1.5".to_string(),
            dimensions: 768,
        }
    }

    /// potion-base-8M - fast 256d embeddings
    pub fn potion_base_8m() -> ModelConfig {
        ModelConfig {
            name: "minishlab/potion-base-8M".to_string(),
            dimensions: 256,
        }
    }

    /// potion-base-32M - larger 256d embeddings
    pub fn potion_base_32m() -> ModelConfig {
        ModelConfig {
            name: "minishlab/potion-base-32M".to_string(),
            dimensions: 256,
        }
    }

    /// M2V_base_output - distilled from bge-base-en-v1.5
    pub fn m2v_base_output() -> ModelConfig {
        ModelConfig {
            name: "minishlab/M2V_base_output".to_string(),
            dimensions: 256,
        }
    }

    pub fn default_config() -> ModelConfig {
        bge_large_en_v1_5()
    }

    /// Which runtime loads `model`. Unknown names are treated as Model2Vec
    /// repositories.
    pub fn engine(model: &str) -> LocalEngine {
        match model {
            "BAAI/bge-large-en-v1.5" | "bge-large-en-v1.5" | "BAAI/bge-base-en-v1.5"
            | "bge-base-en-v1.5" => LocalEngine::FastEmbed,
            _ => LocalEngine::Model2Vec,
        }
    }

    pub fn get_config(model: &str) -> ModelConfig {
        match model {
            "BAAI/bge-large-en-v1.5" | "bge-large-en-v1.5" => bge_large_en_v1_5(),
            "BAAI/bge-base-en-v1.5" | "bge-base-en-v1.5" => bge_base_en_v1_5(),
            "minishlab/potion-base-8M" | "potion-base-8M" => potion_base_8m(),
            "minishlab/potion-base-32M" | "potion-base-32M" => potion_base_32m(),
            "minishlab/M2V_base_output" | "M2V_base_output" => m2v_base_output(),
            _ => ModelConfig {
                name: model.to_string(),
                dimensions: 256, // Model2Vec default
            },
        }
    }
}
