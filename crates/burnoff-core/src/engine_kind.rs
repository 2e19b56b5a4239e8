use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::BurnoffError;

/// One inference backend under comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Native,
    LlamaCpp,
    Python,
}

impl EngineKind {
    pub fn label(&self) -> &'static str {
        match self {
            EngineKind::Native => "Native (GPU)",
            EngineKind::LlamaCpp => "llama.cpp",
            EngineKind::Python => "Python reference",
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            EngineKind::Native => "native",
            EngineKind::LlamaCpp => "llama_cpp",
            EngineKind::Python => "python",
        }
    }

    pub fn all() -> &'static [EngineKind] {
        &[EngineKind::Native, EngineKind::LlamaCpp, EngineKind::Python]
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for EngineKind {
    type Err = BurnoffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "native" | "gpu" => Ok(EngineKind::Native),
            "llama_cpp" | "llama.cpp" | "llamacpp" | "llama-cpp" => Ok(EngineKind::LlamaCpp),
            "python" | "reference" | "pytorch" => Ok(EngineKind::Python),
            other => Err(BurnoffError::InvalidConfig(format!(
                "unknown engine '{}' (expected native, llama_cpp or python)",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("llama.cpp".parse::<EngineKind>().unwrap(), EngineKind::LlamaCpp);
        assert_eq!("LlamaCpp".parse::<EngineKind>().unwrap(), EngineKind::LlamaCpp);
        assert_eq!("reference".parse::<EngineKind>().unwrap(), EngineKind::Python);
        assert_eq!(" native ".parse::<EngineKind>().unwrap(), EngineKind::Native);
        assert!("vllm".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_from_str() {
        for kind in EngineKind::all() {
            assert_eq!(kind.to_string().parse::<EngineKind>().unwrap(), *kind);
        }
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&EngineKind::LlamaCpp).unwrap(), "\"llama_cpp\"");
    }
}
