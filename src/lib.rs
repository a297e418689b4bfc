#![deny(warnings)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
//! `contentcraft` generates blog posts by streaming them from hosted LLM
//! completion endpoints.
//!
//! To get started, fill in a [`Form`], create a [`Generator`] around a
//! [`Client`], and [`run`] the [`Session`] it returns. Each chunk of text is
//! rendered as it arrives and the [`DisplayState`] holds the finished post.
//!
//! For lower level use, [`Client::stream`] returns a [`Stream`] of decoded text
//! chunks and [`stream::consume`] drives it with `on_chunk`/`on_finish`
//! callbacks.
//!
//! [`run`]: Session::run

pub mod client;
pub use client::Client;

pub mod decode;
pub use decode::Utf8Decoder;

pub mod event;

pub mod model;
pub use model::Model;

pub mod request;
pub use request::{Form, GenerationRequest, LengthClass, Tone};

pub mod session;
pub use session::{DisplayState, Generator, Session};

pub mod stream;
pub use stream::Stream;

/// Re-exports of commonly used crates to avoid version conflicts and reduce
/// dependency bloat.
pub mod exports {
    pub use eventsource_stream;
    pub use futures;
    #[cfg(feature = "log")]
    pub use log;
    pub use reqwest;
    pub use serde;
    pub use serde_json;
}
