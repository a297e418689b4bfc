//! [`Generator`] owning the [`DisplayState`], and the [`Session`] for one
//! generation attempt.
//!
//! Every attempt gets a fresh [`SessionToken`]. Chunks are only applied to the
//! display if they carry the current token and the display is still active, so
//! a stopped or superseded session can't write to it, even if it is still
//! being polled.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{AbortHandle, AbortRegistration, Abortable};

use crate::{
    client::{self, Dispatch},
    request::{EmptyKeywords, Form},
    stream::{consume_abortable, Outcome},
    Client, GenerationRequest,
};

/// Identifies one generation attempt. Later attempts get greater tokens.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    derive_more::Display,
)]
#[display("#{_0}")]
pub struct SessionToken(u64);

/// What the user sees. While [`is_active`], [`live_text`] is shown. Once the
/// attempt finishes, [`final_text`] is.
///
/// [`is_active`]: DisplayState::is_active
/// [`live_text`]: DisplayState::live_text
/// [`final_text`]: DisplayState::final_text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayState {
    live_text: String,
    final_text: Option<String>,
    is_active: bool,
    current: SessionToken,
}

impl DisplayState {
    /// Text received so far by the current attempt.
    pub fn live_text(&self) -> &str {
        &self.live_text
    }

    /// Full text of the current attempt, once it finished on its own.
    pub fn final_text(&self) -> Option<&str> {
        self.final_text.as_deref()
    }

    /// Whether an attempt is in progress.
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Token of the attempt this state belongs to.
    pub fn current(&self) -> SessionToken {
        self.current
    }

    /// The text to show: live text while active, then the final text. A
    /// stopped attempt has no final text so keeps showing what it received.
    pub fn shown(&self) -> &str {
        match (&self.final_text, self.is_active) {
            (Some(text), false) => text,
            _ => &self.live_text,
        }
    }

    fn begin(&mut self, token: SessionToken) {
        self.current = token;
        self.live_text.clear();
        self.final_text = None;
        self.is_active = true;
    }

    fn accepts(&self, token: SessionToken) -> bool {
        self.is_active && self.current == token
    }

    /// Append a chunk if `token` is current. Returns whether it was applied.
    fn apply_chunk(&mut self, token: SessionToken, chunk: &str) -> bool {
        if !self.accepts(token) {
            return false;
        }

        self.live_text.push_str(chunk);
        true
    }

    fn finish(&mut self, token: SessionToken, text: &str) -> bool {
        if !self.accepts(token) {
            return false;
        }

        self.final_text = Some(text.to_string());
        self.is_active = false;
        true
    }

    fn deactivate(&mut self, token: SessionToken) {
        if self.current == token {
            self.is_active = false;
        }
    }
}

/// Lifecycle of a [`Session`]. [`Finished`] and [`Aborted`] are final.
///
/// [`Finished`]: State::Finished
/// [`Aborted`]: State::Aborted
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    derive_more::Display,
    derive_more::IsVariant,
)]
pub enum State {
    /// Created, not yet run.
    #[display("idle")]
    Idle,
    /// Dispatched or reading the body.
    #[display("streaming")]
    Streaming,
    /// The body ended on its own.
    #[display("finished")]
    Finished,
    /// Stopped, superseded, or failed.
    #[display("aborted")]
    Aborted,
}

/// What the display receives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Framing {
    /// Decoded body chunks as they arrive, event framing included.
    Raw,
    /// Only the text deltas carried by the event records. See
    /// [`Stream::deltas`].
    ///
    /// [`Stream::deltas`]: crate::Stream::deltas
    #[default]
    Events,
}

/// Session error. Any of these ends the attempt.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Nothing to write about. Nothing was sent and the display is unchanged.
    #[error(transparent)]
    Input(#[from] EmptyKeywords),
    /// The request failed before any text was received.
    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] client::Error),
    /// Reading the body failed part way.
    #[error("Stream failed: {0}")]
    Stream(#[from] crate::stream::Error),
    /// [`Session::run`] was called on a session that already ran.
    #[error("Session {token} already ran and is {state}.")]
    #[allow(missing_docs)]
    AlreadyRun { token: SessionToken, state: State },
}

/// Stops a [`Session`] at its next suspension point, whether it is still
/// dispatching or already reading the body. Dropping the handle does nothing.
#[derive(Debug, Clone)]
pub struct StopHandle {
    dispatch: AbortHandle,
    stream: AbortHandle,
}

impl StopHandle {
    fn new_pair() -> (Self, AbortRegistration, AbortRegistration) {
        let (dispatch, dispatch_registration) = AbortHandle::new_pair();
        let (stream, stream_registration) = AbortHandle::new_pair();
        (
            Self { dispatch, stream },
            dispatch_registration,
            stream_registration,
        )
    }

    /// Stop the session. The body stream is dropped at the next pull.
    pub fn stop(&self) {
        self.dispatch.abort();
        self.stream.abort();
    }
}

fn lock(display: &Mutex<DisplayState>) -> MutexGuard<'_, DisplayState> {
    // Every update leaves the state consistent, so poisoning is ignored.
    display.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Starts [`Session`]s and owns the [`DisplayState`] they write to. At most
/// one session is current: starting one stops the previous.
pub struct Generator<D = Client> {
    dispatcher: D,
    framing: Framing,
    display: Arc<Mutex<DisplayState>>,
    last_token: SessionToken,
    current: Option<StopHandle>,
}

impl<D: Dispatch> Generator<D> {
    /// Create a generator sending requests through `dispatcher`, usually a
    /// [`Client`].
    pub fn new(dispatcher: D) -> Self {
        Self {
            dispatcher,
            framing: Framing::default(),
            display: Default::default(),
            last_token: SessionToken::default(),
            current: None,
        }
    }

    /// Set the [`Framing`] for sessions started after this.
    pub fn framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Snapshot of the [`DisplayState`].
    pub fn display(&self) -> DisplayState {
        lock(&self.display).clone()
    }

    /// Start a new attempt from the `form`. With empty keywords this returns
    /// [`Error::Input`] and nothing else happens. Otherwise the current
    /// session, if any, is stopped and the display is reset for the new one.
    ///
    /// Nothing is sent until the returned [`Session`] is [`run`].
    ///
    /// [`run`]: Session::run
    pub fn generate(&mut self, form: &Form) -> Result<Session<D>, Error> {
        let request = form.request()?;

        self.stop();

        self.last_token = SessionToken(self.last_token.0 + 1);
        let token = self.last_token;
        lock(&self.display).begin(token);

        #[cfg(feature = "log")]
        log::info!(
            "Session {} started: {:?} with {}",
            token,
            request.keywords(),
            request.selected_model()
        );

        let (handle, dispatch, stream) = StopHandle::new_pair();
        self.current = Some(handle.clone());

        Ok(Session {
            token,
            state: State::Idle,
            request,
            framing: self.framing,
            dispatcher: self.dispatcher.clone(),
            display: self.display.clone(),
            handle,
            registrations: Some((dispatch, stream)),
        })
    }

    /// Stop the current session, if any. Text it delivered so far is kept and
    /// stays shown. Nothing it receives from now on is.
    pub fn stop(&mut self) {
        if let Some(handle) = self.current.take() {
            handle.stop();

            let mut display = lock(&self.display);
            #[cfg(feature = "log")]
            {
                if display.is_active() {
                    log::info!("Session {} stopped.", display.current());
                }
            }
            let token = display.current();
            display.deactivate(token);
        }
    }
}

/// One generation attempt. Created [`Idle`] by [`Generator::generate`].
///
/// [`Idle`]: State::Idle
pub struct Session<D = Client> {
    token: SessionToken,
    state: State,
    request: GenerationRequest,
    framing: Framing,
    dispatcher: D,
    display: Arc<Mutex<DisplayState>>,
    handle: StopHandle,
    registrations: Option<(AbortRegistration, AbortRegistration)>,
}

impl<D: Dispatch> Session<D> {
    #[allow(missing_docs)]
    pub fn token(&self) -> SessionToken {
        self.token
    }

    #[allow(missing_docs)]
    pub fn state(&self) -> State {
        self.state
    }

    #[allow(missing_docs)]
    pub fn request(&self) -> &GenerationRequest {
        &self.request
    }

    /// A handle that stops this session from elsewhere, for example another
    /// task. [`Generator::stop`] does the same for the current session.
    pub fn stop_handle(&self) -> StopHandle {
        self.handle.clone()
    }

    /// Dispatch the request and stream the response into the display.
    /// `render` is called with each chunk the display accepted.
    ///
    /// Returns [`Outcome::Finished`] with the full text if the body ended on
    /// its own, or [`Outcome::Aborted`] if the session was stopped. On error
    /// the display is no longer active and no final text is set.
    pub async fn run<R>(&mut self, mut render: R) -> Result<Outcome, Error>
    where
        R: FnMut(&str),
    {
        let Some((dispatch, stream)) = self.registrations.take() else {
            return Err(Error::AlreadyRun {
                token: self.token,
                state: self.state,
            });
        };

        self.state = State::Streaming;

        let body = match Abortable::new(
            self.dispatcher.stream(&self.request),
            dispatch,
        )
        .await
        {
            Ok(Ok(body)) => body,
            Ok(Err(error)) => {
                #[cfg(feature = "log")]
                log::error!(
                    "Session {} dispatch failed: {}",
                    self.token,
                    error
                );

                return Err(self.fail(error.into()));
            }
            Err(_aborted) => {
                self.abort();
                return Ok(Outcome::Aborted);
            }
        };

        let body = match self.framing {
            Framing::Raw => body,
            Framing::Events => body.deltas(),
        };

        let token = self.token;
        let display = &self.display;

        let result = consume_abortable(
            body,
            stream,
            |chunk| {
                if lock(display).apply_chunk(token, chunk) {
                    render(chunk);
                }
            },
            |text| {
                lock(display).finish(token, text);
            },
        )
        .await;

        match result {
            Ok(outcome) => {
                match outcome {
                    Outcome::Finished { .. } => self.state = State::Finished,
                    Outcome::Aborted => self.abort(),
                }

                #[cfg(feature = "log")]
                log::info!("Session {} {}.", self.token, self.state);

                Ok(outcome)
            }
            Err(error) => {
                #[cfg(feature = "log")]
                log::error!("Session {} stream failed: {}", self.token, error);

                Err(self.fail(error.into()))
            }
        }
    }

    /// Move to [`State::Aborted`]. The display stops being active if this is
    /// still its session.
    fn abort(&mut self) {
        self.state = State::Aborted;
        lock(&self.display).deactivate(self.token);
    }

    fn fail(&mut self, error: Error) -> Error {
        self.abort();
        error
    }
}
