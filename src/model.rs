//! [`Model`] to use for generation.
use serde::{Deserialize, Serialize};

/// Model to use for generation. Each model is served from its own endpoint
/// path, see [`Model::path`].
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    derive_more::Display,
)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum Model {
    /// Claude Sonnet 3.5. This is the default model.
    #[default]
    #[display("Claude")]
    Claude,
    /// GPT-4.
    #[display("GPT-4")]
    Gpt4,
}

impl Model {
    /// Endpoint path for the model, relative to the [`Client`] base URL.
    ///
    /// [`Client`]: crate::Client
    pub const fn path(&self) -> &'static str {
        match self {
            Self::Claude => "/integrations/anthropic-claude-sonnet-3-5/",
            Self::Gpt4 => "/integrations/chat-gpt/conversationgpt4",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_model() {
        assert_eq!(Model::default(), Model::Claude);
    }

    #[test]
    fn test_paths_are_distinct() {
        assert_ne!(Model::Claude.path(), Model::Gpt4.path());
        assert!(Model::Claude.path().starts_with("/integrations/"));
        assert!(Model::Gpt4.path().starts_with("/integrations/"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Model::Claude.to_string(), "Claude");
        assert_eq!(Model::Gpt4.to_string(), "GPT-4");
    }
}
