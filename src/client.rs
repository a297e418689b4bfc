//! [`Client`] for the completion endpoints and related types.

use std::future::Future;

use crate::{request::Body, GenerationRequest, Model};

/// Result type for the client. See also [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Client for the completion endpoints.
///
/// See [`Self::new`] for creating a new client and [`Self::stream`] to get
/// started.
#[derive(Clone, Debug)]
pub struct Client {
    /// Inner [`reqwest::Client`]. Setting this to a custom client is fine as
    /// long as it does not strip the `Content-Type` header set on every
    /// request.
    pub inner: reqwest::Client,
    /// Base URL the [`Model::path`]s are joined onto.
    base_url: reqwest::Url,
}

impl Client {
    /// Our user agent.
    pub const USER_AGENT: &'static str =
        concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION"));
    /// Default base URL. The endpoints are served from the same origin as the
    /// page, which in development is this.
    pub const DEFAULT_BASE_URL: &'static str = "http://localhost:3000";

    /// Create a new client for the endpoints under `base_url`.
    pub fn new<U>(base_url: U) -> Result<Self>
    where
        U: reqwest::IntoUrl,
    {
        let base_url = base_url.into_url()?;

        #[cfg(feature = "log")]
        {
            log::info!(concat!(
                "Creating ",
                env!("CARGO_PKG_NAME"),
                " client..."
            ));
            log::debug!(concat!("Crate version: ", env!("CARGO_PKG_VERSION")));
            log::debug!("Base URL: {}", base_url);
        }

        // Headers for all requests.
        let mut headers = reqwest::header::HeaderMap::new();

        // Content type needs to be set to JSON.
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        Ok(Self {
            inner: reqwest::Client::builder()
                .default_headers(headers)
                .user_agent(Self::USER_AGENT)
                .build()?,
            base_url,
        })
    }

    /// The base URL.
    pub fn base_url(&self) -> &reqwest::Url {
        &self.base_url
    }

    /// Full URL of the endpoint serving `model`. Only the scheme, host and
    /// port of the base URL are kept.
    pub fn endpoint(&self, model: Model) -> reqwest::Url {
        let mut url = self.base_url.clone();
        url.set_path(model.path());
        url.set_query(None);
        url.set_fragment(None);
        url
    }

    /// Send a POST request with a JSON body.
    pub async fn post<U, B>(
        &self,
        url: U,
        body: B,
    ) -> reqwest::Result<reqwest::Response>
    where
        U: reqwest::IntoUrl,
        B: serde::Serialize,
    {
        #[cfg(feature = "log")]
        {
            log::debug!("POST request to {}", url.as_str());
            if let Ok(json) = serde_json::to_string_pretty(&body) {
                log::debug!("Sending body:\n{}", json);
            } else {
                log::warn!("Could not serialize body. Request will fail.");
            }
        }

        self.inner.post(url).json(&body).send().await
    }

    /// Post a [`Body`] to a custom URL. This is useful for testing or for a
    /// compatible endpoint that isn't one of the [`Model`]s.
    ///
    /// Fails if the request can't be sent or the status isn't a success. No
    /// retry is attempted. The body of a successful response is not read.
    pub async fn dispatch_custom<U>(
        &self,
        body: &Body,
        url: U,
    ) -> Result<reqwest::Response>
    where
        U: reqwest::IntoUrl,
    {
        let response = self.post(url, body).await?;

        let status = response.status();
        if !status.is_success() {
            // The body is only for the error message. If it can't be read,
            // the status is enough.
            let body = response.text().await.unwrap_or_default();

            #[cfg(feature = "log")]
            log::error!("Endpoint returned {}: {}", status, body);

            return Err(Error::Status { status, body });
        }

        Ok(response)
    }

    /// Post a [`GenerationRequest`] to its model's endpoint with streaming on.
    /// On success the response body has not been read yet.
    ///
    /// See [`Self::stream`] for the body as a text [`Stream`].
    ///
    /// [`Stream`]: crate::Stream
    pub async fn dispatch(
        &self,
        request: &GenerationRequest,
    ) -> Result<reqwest::Response> {
        let url = self.endpoint(request.selected_model());
        self.dispatch_custom(&request.body(), url).await
    }

    /// [`dispatch`] a request and return the body as a [`Stream`] of decoded
    /// text chunks.
    ///
    /// [`dispatch`]: Self::dispatch
    /// [`Stream`]: crate::Stream
    pub async fn stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<crate::Stream> {
        let response = self.dispatch(request).await?;
        Ok(crate::Stream::new(response.bytes_stream()))
    }
}

/// Something that turns a [`GenerationRequest`] into a text [`Stream`]. This is
/// [`Client`] outside of tests.
///
/// [`Stream`]: crate::Stream
pub trait Dispatch: Clone + Send + Sync + 'static {
    /// Send `request` and return the response body as text chunks.
    fn stream(
        &self,
        request: &GenerationRequest,
    ) -> impl Future<Output = Result<crate::Stream>> + Send;
}

impl Dispatch for Client {
    fn stream(
        &self,
        request: &GenerationRequest,
    ) -> impl Future<Output = Result<crate::Stream>> + Send {
        Client::stream(self, request)
    }
}

/// [`Client`] error type. All of these happen before any text is received.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP error, including failure to connect.
    #[error("HTTP error: {0}")]
    HTTP(#[from] reqwest::Error),
    /// The endpoint answered with a status other than success.
    #[error("Unexpected status {status}: {body}")]
    #[allow(missing_docs)]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use crate::{LengthClass, Tone};
    use futures::TryStreamExt;
    use std::sync::{Arc, Mutex};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    /// What a [`serve`] stub saw.
    #[derive(Debug, Default)]
    pub struct Seen {
        pub request_line: String,
        pub content_type: Option<String>,
        pub body: String,
    }

    /// Serve a single HTTP/1.1 response on a local port. `blocks` are written
    /// to the socket one at a time after the headers, then the connection is
    /// closed. Returns the base URL and what the stub received.
    pub async fn serve(
        status: &'static str,
        blocks: Vec<&'static [u8]>,
    ) -> (String, Arc<Mutex<Seen>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Seen::default()));

        let seen_by_task = seen.clone();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            // Read until the end of the headers and the whole body.
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);

                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some((head, body)) = text.split_once("\r\n\r\n") {
                    let length = head
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);

                    if body.len() >= length {
                        let mut seen = seen_by_task.lock().unwrap();
                        seen.request_line =
                            head.lines().next().unwrap_or_default().into();
                        seen.content_type = head.lines().find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-type")
                                .then(|| value.trim().to_string())
                        });
                        seen.body = body.to_string();
                        break;
                    }
                }
            }

            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n"
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            for block in blocks {
                socket.write_all(block).await.unwrap();
                socket.flush().await.unwrap();
            }
            socket.shutdown().await.ok();
        });

        (format!("http://{addr}"), seen)
    }

    #[test]
    fn test_endpoints() {
        let client =
            Client::new("http://localhost:3000/some/page?q=1").unwrap();

        assert_eq!(
            client.endpoint(Model::Claude).as_str(),
            "http://localhost:3000/integrations/anthropic-claude-sonnet-3-5/"
        );
        assert_eq!(
            client.endpoint(Model::Gpt4).as_str(),
            "http://localhost:3000/integrations/chat-gpt/conversationgpt4"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            Client::new("not a url").unwrap_err(),
            Error::HTTP(_)
        ));
    }

    #[tokio::test]
    async fn test_dispatch_posts_to_model_endpoint() {
        let (base_url, seen) = serve("200 OK", vec![b"hello"]).await;
        let client = Client::new(base_url).unwrap();

        let request = GenerationRequest::new("gardening")
            .unwrap()
            .tone(Tone::Casual)
            .length(LengthClass::Short)
            .model(Model::Claude);

        let text: String = client
            .stream(&request)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(text, "hello");

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.request_line,
            "POST /integrations/anthropic-claude-sonnet-3-5/ HTTP/1.1"
        );
        assert_eq!(seen.content_type.as_deref(), Some("application/json"));

        let body: Body = serde_json::from_str(&seen.body).unwrap();
        assert_eq!(body, request.body());
        assert!(body.stream);
        assert!(body.messages[0].content.contains("150-300 words"));
        assert!(body.messages[0].content.contains("casual tone"));
    }

    #[tokio::test]
    async fn test_dispatch_gpt4() {
        let (base_url, seen) = serve("200 OK", vec![]).await;
        let client = Client::new(base_url).unwrap();

        let request = GenerationRequest::new("tea").unwrap().model(Model::Gpt4);
        client.dispatch(&request).await.unwrap();

        assert_eq!(
            seen.lock().unwrap().request_line,
            "POST /integrations/chat-gpt/conversationgpt4 HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn test_dispatch_status_error() {
        let (base_url, _) =
            serve("503 Service Unavailable", vec![b"try later"]).await;
        let client = Client::new(base_url).unwrap();

        let request = GenerationRequest::new("tea").unwrap();
        match client.dispatch(&request).await.unwrap_err() {
            Error::Status { status, body } => {
                assert_eq!(status, reqwest::StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "try later");
            }
            error => panic!("Unexpected error: {:?}", error),
        }
    }

    #[tokio::test]
    async fn test_dispatch_connection_refused() {
        // Bind then drop to get a port nothing listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let client = Client::new(format!("http://{addr}")).unwrap();

        let request = GenerationRequest::new("tea").unwrap();
        assert!(matches!(
            client.dispatch(&request).await.unwrap_err(),
            Error::HTTP(_)
        ));
    }
}
