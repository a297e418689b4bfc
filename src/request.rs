//! [`GenerationRequest`] and the wire [`Body`] sent to the completion
//! endpoints.
//!
//! A [`GenerationRequest`] can only be built from non-empty keywords. The usual
//! way to get one is from a [`Form`] holding the user's current choices.

use serde::{Deserialize, Serialize};

use crate::Model;

/// Tone the post should be written in.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    derive_more::Display,
)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    /// This is the default tone.
    #[default]
    #[display("professional")]
    Professional,
    #[allow(missing_docs)]
    #[display("casual")]
    Casual,
    #[allow(missing_docs)]
    #[display("friendly")]
    Friendly,
    #[allow(missing_docs)]
    #[display("formal")]
    Formal,
}

/// Length of the post, mapped to a word-count range by
/// [`LengthClass::word_range`].
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    derive_more::Display,
)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum LengthClass {
    /// 150-300 words.
    #[display("short")]
    Short,
    /// 300-500 words. This is the default.
    #[default]
    #[display("medium")]
    Medium,
    /// 500-750 words.
    #[display("long")]
    Long,
}

impl LengthClass {
    /// Word-count range as it appears in the prompt.
    pub const fn word_range(&self) -> &'static str {
        match self {
            Self::Short => "150-300",
            Self::Medium => "300-500",
            Self::Long => "500-750",
        }
    }
}

/// Error when building a [`GenerationRequest`] from empty keywords. Nothing is
/// sent when this happens.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Keywords must not be empty.")]
pub struct EmptyKeywords;

/// Everything needed to generate one post. Immutable once built. Use the
/// setters on the value returned by [`GenerationRequest::new`] to change the
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    keywords: String,
    tone: Tone,
    length: LengthClass,
    model: Model,
}

impl GenerationRequest {
    /// Create a request with default [`Tone`], [`LengthClass`] and [`Model`].
    /// Fails with [`EmptyKeywords`] if `keywords` is empty.
    pub fn new<S>(keywords: S) -> Result<Self, EmptyKeywords>
    where
        S: Into<String>,
    {
        let keywords = keywords.into();
        if keywords.is_empty() {
            return Err(EmptyKeywords);
        }

        Ok(Self {
            keywords,
            tone: Default::default(),
            length: Default::default(),
            model: Default::default(),
        })
    }

    /// Set the [`Tone`].
    pub fn tone(mut self, tone: Tone) -> Self {
        self.tone = tone;
        self
    }

    /// Set the [`LengthClass`].
    pub fn length(mut self, length: LengthClass) -> Self {
        self.length = length;
        self
    }

    /// Set the [`Model`].
    pub fn model(mut self, model: Model) -> Self {
        self.model = model;
        self
    }

    /// The keywords. Never empty.
    pub fn keywords(&self) -> &str {
        &self.keywords
    }

    /// The selected [`Tone`].
    pub fn selected_tone(&self) -> Tone {
        self.tone
    }

    /// The selected [`LengthClass`].
    pub fn selected_length(&self) -> LengthClass {
        self.length
    }

    /// The selected [`Model`].
    pub fn selected_model(&self) -> Model {
        self.model
    }

    /// The instruction sent to the model.
    pub fn prompt(&self) -> String {
        format!(
            "Generate a blog post about {}. The blog post should be \
             informative and engaging, with a clear structure including an \
             introduction, main points, and a conclusion. Use a {} tone. Aim \
             for {} words.",
            self.keywords,
            self.tone,
            self.length.word_range(),
        )
    }

    /// The wire [`Body`] for this request, with streaming on.
    pub fn body(&self) -> Body {
        Body {
            messages: vec![Message {
                role: Role::User,
                content: self.prompt(),
            }],
            stream: true,
        }
    }
}

/// User-editable choices. Unlike [`GenerationRequest`] this may hold empty
/// keywords; [`Form::request`] is where that is checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Form {
    /// What to write about.
    pub keywords: String,
    #[allow(missing_docs)]
    pub tone: Tone,
    #[allow(missing_docs)]
    pub length: LengthClass,
    #[allow(missing_docs)]
    pub model: Model,
}

impl Form {
    /// Build a [`GenerationRequest`] from the current choices.
    pub fn request(&self) -> Result<GenerationRequest, EmptyKeywords> {
        Ok(GenerationRequest::new(self.keywords.clone())?
            .tone(self.tone)
            .length(self.length)
            .model(self.model))
    }
}

impl TryFrom<&Form> for GenerationRequest {
    type Error = EmptyKeywords;

    fn try_from(form: &Form) -> Result<Self, Self::Error> {
        form.request()
    }
}

/// Role of a [`Message`] author.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// From the user.
    User,
    /// From the model.
    Assistant,
}

/// A single message in the [`Body`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    #[allow(missing_docs)]
    pub role: Role,
    #[allow(missing_docs)]
    pub content: String,
}

/// JSON body posted to the endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Body {
    #[allow(missing_docs)]
    pub messages: Vec<Message>,
    /// Always `true` for requests built by this crate.
    pub stream: bool,
}
