//! Text chunk [`Stream`] over a streaming response body, the [`consume`] pull
//! loop, and errors only seen while streaming.
use futures::{
    stream::{AbortHandle, AbortRegistration, Abortable},
    StreamExt,
};
use std::{pin::Pin, task::Poll};

use crate::decode::Utf8Decoder;

/// Stream error. Any of these ends the stream for the current attempt.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The body could not be read (connection reset, timeout, etc.).
    #[error("Read error: {error}")]
    Read {
        /// Transport error from the body stream.
        error: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Event framing could not be parsed. Only produced by [`Stream::deltas`].
    #[error("Event stream error: {message}")]
    Event {
        #[allow(missing_docs)]
        message: String,
    },
    /// An event's data was not the expected JSON.
    #[error("JSON error: {error}")]
    Parse {
        /// Error from [`serde_json`].
        error: serde_json::Error,
        /// [`eventsource_stream::Event`] that did not parse.
        event: eventsource_stream::Event,
    },
    /// The endpoint sent an error record instead of a delta.
    #[error("API error: {message}")]
    Api {
        #[allow(missing_docs)]
        message: String,
        /// [`eventsource_stream::Event`] containing the error.
        event: eventsource_stream::Event,
    },
}

/// Stream of decoded text chunks, in arrival order. Finite and not restartable.
///
/// A multi-byte character split across body blocks is yielded once, with the
/// block that completes it. Blocks that complete no character yield nothing.
pub struct Stream {
    inner: Pin<
        Box<dyn futures::Stream<Item = Result<String, Error>> + Send + 'static>,
    >,
}

static_assertions::assert_impl_all!(Stream: futures::Stream, Send);

impl Stream {
    /// Create a new stream from a byte stream such as
    /// [`reqwest::Response::bytes_stream`]. The stream ends after the first
    /// read error.
    pub fn new<S, B, E>(bytes: S) -> Self
    where
        S: futures::Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
    {
        let decoded = futures::stream::unfold(
            (Box::pin(bytes), Utf8Decoder::new(), false),
            |(mut bytes, mut decoder, done)| async move {
                if done {
                    return None;
                }

                loop {
                    match bytes.next().await {
                        Some(Ok(block)) => {
                            let text = decoder.decode(block.as_ref());
                            if !text.is_empty() {
                                #[cfg(feature = "log")]
                                log::trace!("Chunk: {:?}", text);

                                return Some((
                                    Ok(text),
                                    (bytes, decoder, false),
                                ));
                            }
                        }
                        Some(Err(error)) => {
                            let error = Error::Read {
                                error: error.into(),
                            };

                            #[cfg(feature = "log")]
                            log::error!("Stream error: {}", error);

                            return Some((Err(error), (bytes, decoder, true)));
                        }
                        None => {
                            return decoder
                                .finish()
                                .map(|text| (Ok(text), (bytes, decoder, true)));
                        }
                    }
                }
            },
        );

        Self::from_text(decoded)
    }

    /// Wrap a stream that already yields text chunks.
    pub fn from_text<S>(text: S) -> Self
    where
        S: futures::Stream<Item = Result<String, Error>> + Send + 'static,
    {
        Self {
            inner: Box::pin(text),
        }
    }
}

impl futures::Stream for Stream {
    type Item = Result<String, Error>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context,
    ) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// How a [`consume`] call ended, if it did not fail.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::IsVariant)]
pub enum Outcome {
    /// The stream ended on its own. `on_finish` was called with `text`.
    Finished {
        /// Every chunk, concatenated in delivery order.
        text: String,
    },
    /// Cancelled through the [`AbortHandle`]. `on_finish` was not called.
    Aborted,
}

impl Outcome {
    /// The final text, if [`Finished`].
    ///
    /// [`Finished`]: Outcome::Finished
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Finished { text } => Some(text),
            Self::Aborted => None,
        }
    }
}

/// Pull every chunk from `stream`, calling `on_chunk` for each in order and
/// `on_finish` once with all of them joined when the stream ends.
///
/// On a read error the loop stops, `on_finish` is not called, and the error is
/// returned. Clearing any "in progress" state is up to the caller.
///
/// See [`consume_abortable`] for a cancellable version.
pub async fn consume<S, C, F>(
    stream: S,
    on_chunk: C,
    on_finish: F,
) -> Result<Outcome, Error>
where
    S: futures::Stream<Item = Result<String, Error>>,
    C: FnMut(&str),
    F: FnOnce(&str),
{
    let (_handle, registration) = AbortHandle::new_pair();
    consume_abortable(stream, registration, on_chunk, on_finish).await
}

/// [`consume`] with cancellation. After the paired [`AbortHandle::abort`] is
/// called, the next pull ends the loop: `stream` is not polled again and is
/// dropped, and neither callback fires again. Returns [`Outcome::Aborted`].
pub async fn consume_abortable<S, C, F>(
    stream: S,
    registration: AbortRegistration,
    mut on_chunk: C,
    on_finish: F,
) -> Result<Outcome, Error>
where
    S: futures::Stream<Item = Result<String, Error>>,
    C: FnMut(&str),
    F: FnOnce(&str),
{
    let mut stream = std::pin::pin!(Abortable::new(stream, registration));
    let mut text = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        text.push_str(&chunk);
        on_chunk(&chunk);
    }

    if stream.is_aborted() {
        #[cfg(feature = "log")]
        log::debug!("Stream aborted after {} bytes of text.", text.len());

        return Ok(Outcome::Aborted);
    }

    #[cfg(feature = "log")]
    log::debug!("Stream finished with {} bytes of text.", text.len());

    on_finish(&text);

    Ok(Outcome::Finished { text })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use futures::TryStreamExt;
    use std::io;

    /// Creates a mock body from byte blocks.
    pub fn mock_body(
        blocks: &[&'static [u8]],
    ) -> impl futures::Stream<Item = Result<&'static [u8], io::Error>> {
        futures::stream::iter(blocks.to_vec().into_iter().map(Ok))
    }

    /// Creates a mock [`Stream`] from byte blocks.
    pub fn mock_stream(blocks: &[&'static [u8]]) -> Stream {
        Stream::new(mock_body(blocks))
    }

    #[tokio::test]
    async fn test_stream_chunks() {
        let chunks: Vec<String> =
            mock_stream(&[b"Once upon ", b"a time, ", b"the end."])
                .try_collect()
                .await
                .unwrap();

        assert_eq!(chunks, ["Once upon ", "a time, ", "the end."]);
    }

    #[tokio::test]
    async fn test_stream_split_character() {
        // "ü" is C3 BC.
        let chunks: Vec<String> = mock_stream(&[b"Gr\xC3", b"\xBCn", b"e"])
            .try_collect()
            .await
            .unwrap();

        assert_eq!(chunks, ["Gr", "ün", "e"]);
    }

    #[tokio::test]
    async fn test_stream_partial_only_block() {
        // The middle block completes no character so yields no chunk.
        let chunks: Vec<String> =
            mock_stream(&[b"\xF0\x9F", b"\x99", b"\x8F done"])
                .try_collect()
                .await
                .unwrap();

        assert_eq!(chunks, ["🙏 done"]);
    }

    #[tokio::test]
    async fn test_stream_truncated_character() {
        let chunks: Vec<String> = mock_stream(&[b"bye", b"\xE2\x82"])
            .try_collect()
            .await
            .unwrap();

        assert_eq!(chunks, ["bye", "\u{FFFD}"]);
    }

    #[tokio::test]
    async fn test_consume() {
        let mut seen = Vec::new();
        let mut finished = Vec::new();

        let outcome = consume(
            mock_stream(&[b"Once upon ", b"a time, ", b"the end."]),
            |chunk| seen.push(chunk.to_string()),
            |text| finished.push(text.to_string()),
        )
        .await
        .unwrap();

        assert_eq!(seen, ["Once upon ", "a time, ", "the end."]);
        assert_eq!(finished, ["Once upon a time, the end."]);
        assert_eq!(
            outcome,
            Outcome::Finished {
                text: "Once upon a time, the end.".into()
            }
        );
    }

    #[tokio::test]
    async fn test_consume_empty() {
        let mut chunks = 0;
        let mut finished = Vec::new();

        let outcome = consume(
            mock_stream(&[]),
            |_| chunks += 1,
            |text| finished.push(text.to_string()),
        )
        .await
        .unwrap();

        assert_eq!(chunks, 0);
        assert_eq!(finished, [""]);
        assert_eq!(outcome.into_text().as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_consume_read_error() {
        let body = futures::stream::iter(vec![
            Ok(b"partial ".as_slice()),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            Ok(b"never".as_slice()),
        ]);

        let mut seen = Vec::new();
        let mut finished = false;

        let err = consume(
            Stream::new(body),
            |chunk| seen.push(chunk.to_string()),
            |_| finished = true,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Read { .. }));
        assert_eq!(err.to_string(), "Read error: reset");
        assert_eq!(seen, ["partial "]);
        assert!(!finished);
    }

    #[tokio::test]
    async fn test_consume_abort() {
        let (handle, registration) = AbortHandle::new_pair();

        let mut seen = Vec::new();
        let mut finished = false;

        let outcome = consume_abortable(
            mock_stream(&[b"one ", b"two ", b"three"]),
            registration,
            |chunk| {
                seen.push(chunk.to_string());
                if seen.len() == 2 {
                    handle.abort();
                }
            },
            |_| finished = true,
        )
        .await
        .unwrap();

        assert_eq!(outcome, Outcome::Aborted);
        assert_eq!(seen, ["one ", "two "]);
        assert!(!finished);
    }

    #[tokio::test]
    async fn test_consume_abort_before_start() {
        let (handle, registration) = AbortHandle::new_pair();
        handle.abort();

        let mut chunks = 0;
        let outcome = consume_abortable(
            mock_stream(&[b"ignored"]),
            registration,
            |_| chunks += 1,
            |_| panic!("on_finish after abort"),
        )
        .await
        .unwrap();

        assert!(outcome.is_aborted());
        assert_eq!(chunks, 0);
    }
}
