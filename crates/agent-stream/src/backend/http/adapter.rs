use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::backend::{LineStream, RunBackend};
use crate::errors::{BackendError, StreamError};
use crate::model::{RunId, RunStatusReport};

use super::config::HttpBackendConfig;
use super::transport::LineDecoder;

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// `RunBackend` talking to the agent API over HTTP.
#[derive(Clone)]
pub struct HttpRunBackend {
    client: reqwest::Client,
    config: HttpBackendConfig,
}

impl HttpRunBackend {
    /// Creates a backend from explicit configuration.
    pub fn new(config: HttpBackendConfig) -> Result<Self, StreamError> {
        if config.base_url.trim().is_empty() {
            return Err(StreamError::Config(
                "HTTP backend base_url must not be empty".into(),
            ));
        }
        // No client-wide timeout: it would cut long-lived event streams.
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| StreamError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a backend from `AGENT_STREAM_BASE_URL` / `AGENT_STREAM_TOKEN`.
    pub fn from_env() -> Result<Self, StreamError> {
        Self::new(HttpBackendConfig::from_env()?)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.bearer_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait::async_trait]
impl RunBackend for HttpRunBackend {
    fn open_stream(&self, run_id: &RunId) -> LineStream {
        let request = self
            .authorize(self.client.get(self.config.stream_url(run_id)))
            .header(reqwest::header::ACCEPT, "text/event-stream");
        let run_id = run_id.clone();

        let connect = async move {
            debug!(run_id = %run_id, "opening agent run stream");
            let response = request
                .send()
                .await
                .map_err(|e| BackendError::transport(format!("stream request failed: {e}")))?;
            let response = check_status(&run_id, response).await?;
            let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
            Ok::<_, BackendError>(line_stream(bytes_stream))
        };

        Box::pin(
            stream::once(connect)
                .map(|opened| match opened {
                    Ok(lines) => lines.boxed(),
                    Err(err) => stream::once(async move { Err(err) }).boxed(),
                })
                .flatten(),
        )
    }

    async fn query_status(&self, run_id: &RunId) -> Result<RunStatusReport, BackendError> {
        let response = self
            .authorize(self.client.get(self.config.status_url(run_id)))
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| BackendError::transport(format!("status request failed: {e}")))?;
        let response = check_status(run_id, response).await?;
        response
            .json::<RunStatusReport>()
            .await
            .map_err(|e| BackendError::protocol(format!("invalid status response: {e}")))
    }

    async fn request_stop(&self, run_id: &RunId) -> Result<(), BackendError> {
        let response = self
            .authorize(self.client.post(self.config.stop_url(run_id)))
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| BackendError::transport(format!("stop request failed: {e}")))?;
        check_status(run_id, response).await?;
        Ok(())
    }
}

async fn check_status(
    run_id: &RunId,
    response: reqwest::Response,
) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(BackendError::not_found(run_id.clone(), body));
    }
    Err(BackendError::http(status.as_u16(), body))
}

fn line_stream(
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = Result<String, BackendError>> + Send {
    struct State {
        bytes_stream: ByteStream,
        decoder: LineDecoder,
        pending: VecDeque<String>,
        done: bool,
    }

    stream::try_unfold(
        State {
            bytes_stream,
            decoder: LineDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(line) = state.pending.pop_front() {
                    return Ok(Some((line, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        state.pending.extend(state.decoder.push_chunk(&chunk));
                    }
                    Some(Err(e)) => {
                        return Err(BackendError::transport(format!(
                            "stream read failed: {e}"
                        )));
                    }
                    None => {
                        state.pending.extend(state.decoder.finish());
                        state.done = true;
                    }
                }
            }
        },
    )
}
