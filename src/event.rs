//! Event [`Record`]s framing the text in a streamed response, and
//! [`Stream::deltas`] to turn raw chunks into text deltas.
//!
//! Both endpoints answer with server-sent events, one JSON record per `data:`
//! line. The Claude endpoint sends Anthropic Messages API events and the GPT-4
//! endpoint sends OpenAI `chat.completion.chunk` records. Only the records
//! that carry text are of interest here.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;

use crate::stream::{Error, Stream};

/// Sentinel data sent by OpenAI compatible endpoints after the last record.
pub const DONE: &str = "[DONE]";

/// One decoded event record.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Record {
    /// Error record. The stream is not usable after one of these.
    Error {
        #[allow(missing_docs)]
        error: ApiError,
    },
    /// Anthropic Messages API event.
    Anthropic(AnthropicEvent),
    /// OpenAI chat completion chunk.
    OpenAi {
        #[allow(missing_docs)]
        choices: Vec<Choice>,
    },
    /// Valid JSON of any other shape. Skipped.
    Unknown(serde_json::Value),
}

impl Record {
    /// The text this record adds to the post, if any. Empty text is [`None`].
    pub fn into_text(self) -> Option<String> {
        let text = match self {
            Self::Anthropic(AnthropicEvent::ContentBlockDelta {
                delta: Delta::Text { text },
            }) => Some(text),
            Self::OpenAi { choices } => {
                choices.into_iter().next().and_then(|c| c.delta.content)
            }
            _ => None,
        };

        text.filter(|text| !text.is_empty())
    }
}

/// Error body inside an error [`Record`].
#[derive(Debug, Deserialize, PartialEq)]
pub struct ApiError {
    /// Error type, for example `overloaded_error`.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[allow(missing_docs)]
    pub message: String,
}

/// Anthropic event. Everything but text deltas is [`Other`].
///
/// [`Other`]: AnthropicEvent::Other
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AnthropicEvent {
    /// Content block delta.
    ContentBlockDelta {
        /// Delta to apply to the content block.
        delta: Delta,
    },
    /// Pings, message start and stop, and so on.
    #[serde(other)]
    Other,
}

/// Anthropic content block delta.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Delta {
    /// Text delta.
    #[serde(rename = "text_delta", alias = "text")]
    Text {
        #[allow(missing_docs)]
        text: String,
    },
    /// Tool input JSON and anything newer.
    #[serde(other)]
    Other,
}

/// OpenAI streamed choice.
#[derive(Debug, Deserialize, PartialEq)]
pub struct Choice {
    #[allow(missing_docs)]
    #[serde(default)]
    pub delta: ChoiceDelta,
}

/// OpenAI choice delta. The first carries only the role and the last is empty.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct ChoiceDelta {
    #[allow(missing_docs)]
    #[serde(default)]
    pub content: Option<String>,
}

/// Text delta carried by one event, if any.
fn delta(event: Event) -> Option<Result<String, Error>> {
    #[cfg(feature = "log")]
    log::trace!("Event: {:?}", event);

    if event.data.is_empty() || event.data == DONE {
        return None;
    }

    match serde_json::from_str::<Record>(&event.data) {
        Ok(Record::Error { error }) => Some(Err(Error::Api {
            message: error.message,
            event,
        })),
        Ok(Record::Unknown(_value)) => {
            #[cfg(feature = "log")]
            log::warn!("Skipping unknown record: {}", _value);

            None
        }
        Ok(record) => record.into_text().map(Ok),
        Err(error) => Some(Err(Error::Parse { error, event })),
    }
}

impl Stream {
    /// Parse the chunks as server-sent events and yield only the text each
    /// [`Record`] carries. Records without text and the [`DONE`] sentinel are
    /// skipped. An error record ends up as [`Error::Api`].
    ///
    /// A last event missing its blank line is still dispatched when the body
    /// ends. A body with text in it but no events at all is an
    /// [`Error::Event`] rather than an empty post.
    pub fn deltas(self) -> Stream {
        let received = Arc::new(AtomicBool::new(false));

        let text = {
            let received = received.clone();
            self.inspect_ok(move |chunk| {
                if !chunk.trim().is_empty() {
                    received.store(true, Ordering::Relaxed);
                }
            })
            .chain(futures::stream::once(futures::future::ready(Ok(
                String::from("\n\n"),
            ))))
        };

        let events = Box::pin(text.eventsource());

        Stream::from_text(futures::stream::unfold(
            (events, false, received),
            |(mut events, mut parsed, received)| async move {
                loop {
                    let item = match events.next().await {
                        Some(Ok(event)) => {
                            parsed = true;
                            match delta(event) {
                                Some(item) => item,
                                None => continue,
                            }
                        }
                        Some(Err(EventStreamError::Transport(error))) => {
                            Err(error)
                        }
                        Some(Err(error)) => Err(Error::Event {
                            message: error.to_string(),
                        }),
                        None if !parsed && received.load(Ordering::Relaxed) => {
                            #[cfg(feature = "log")]
                            log::error!("Body had text but no events.");

                            // Marked parsed so the next pull ends the stream.
                            parsed = true;
                            Err(Error::Event {
                                message: "body is not an event stream".into(),
                            })
                        }
                        None => return None,
                    };

                    return Some((item, (events, parsed, received)));
                }
            },
        ))
    }
}
