#[cfg(test)]
#[path = "braindrive_test.rs"]
mod tests;

use std::io;
use std::time::Duration;

use anyhow::bail;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::TryStreamExt;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::io::StreamReader;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::SubmissionRequest;
use crate::domain::models::Transport;
use crate::domain::models::TransportError;

const COMPLETION_PATH: &str = "/api/v1/ai/providers/chat";
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

fn convert_err(err: reqwest::Error) -> io::Error {
    let err_msg = err.to_string();
    if err.is_timeout() {
        return io::Error::new(io::ErrorKind::TimedOut, err_msg);
    }

    return io::Error::new(io::ErrorKind::Interrupted, err_msg);
}

fn convert_io_err(err: io::Error) -> TransportError {
    if err.kind() == io::ErrorKind::TimedOut {
        return TransportError::Timeout;
    }

    return TransportError::Network(err.to_string());
}

async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }

    let body = res.text().await.unwrap_or_default();
    tracing::error!(
        status = status.as_u16(),
        body = %body,
        "Failed to make completion request to BrainDrive"
    );

    return Err(TransportError::Status {
        status: status.as_u16(),
        body,
    });
}

/// Talks to the BrainDrive chat completion endpoint.
pub struct BrainDrive {
    url: String,
    token: String,
}

impl Default for BrainDrive {
    fn default() -> BrainDrive {
        return BrainDrive::new(
            &Config::get(ConfigKey::ApiURL),
            &Config::get(ConfigKey::ApiToken),
        );
    }
}

impl BrainDrive {
    pub fn new(url: &str, token: &str) -> BrainDrive {
        return BrainDrive {
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        };
    }

    fn completion_request(&self, request: &SubmissionRequest, stream: bool) -> reqwest::RequestBuilder {
        let mut payload = request.payload();
        payload.stream = stream;

        let mut builder = reqwest::Client::new()
            .post(format!("{url}{COMPLETION_PATH}", url = self.url))
            .json(&payload);
        // Streamed bodies have no overall deadline, stalls are detected per fragment.
        if !stream {
            builder = builder.timeout(request.timeout);
        }
        if !self.token.is_empty() {
            builder = builder.bearer_auth(&self.token);
        }

        return builder;
    }

    async fn stream_lines(
        &self,
        request: &SubmissionRequest,
        tx: &mpsc::UnboundedSender<String>,
    ) -> Result<(), TransportError> {
        let res = time::timeout(request.timeout, self.completion_request(request, true).send())
            .await
            .map_err(|_| return TransportError::Timeout)??;
        let res = check_status(res).await?;

        let stream = res.bytes_stream().map_err(convert_err);
        let mut lines_reader = StreamReader::new(stream).lines();

        loop {
            let line = match lines_reader.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => return Err(convert_io_err(err)),
            };

            tracing::trace!(line = %line, "Completion fragment");
            if tx.send(line).is_err() {
                // Nobody is listening for the rest of the response.
                return Err(TransportError::Cancelled);
            }
        }

        return Ok(());
    }
}

#[async_trait]
impl Transport for BrainDrive {
    #[allow(clippy::implicit_return)]
    async fn health_check(&self) -> Result<()> {
        if self.url.is_empty() {
            bail!("BrainDrive API URL is not defined");
        }

        let mut builder = reqwest::Client::new()
            .get(format!("{url}/health", url = self.url))
            .timeout(HEALTH_CHECK_TIMEOUT);
        if !self.token.is_empty() {
            builder = builder.bearer_auth(&self.token);
        }

        let status = match builder.send().await {
            Ok(res) => res.status().as_u16(),
            Err(err) => {
                tracing::error!(error = ?err, "BrainDrive is not reachable");
                bail!("BrainDrive is not reachable");
            }
        };
        if status >= 400 {
            tracing::error!(status = status, "BrainDrive health check failed");
            bail!("BrainDrive health check failed");
        }

        return Ok(());
    }

    #[allow(clippy::implicit_return)]
    async fn send_streaming<'a>(
        &self,
        request: &SubmissionRequest,
        tx: &'a mpsc::UnboundedSender<String>,
    ) -> Result<(), TransportError> {
        let cancel = request.cancel.clone();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(TransportError::Cancelled);
            }
            res = self.stream_lines(request, tx) => {
                return res;
            }
        }
    }

    #[allow(clippy::implicit_return)]
    async fn send_buffered(
        &self,
        request: &SubmissionRequest,
    ) -> Result<serde_json::Value, TransportError> {
        let cancel = request.cancel.clone();
        let call = async {
            let res = self.completion_request(request, false).send().await?;
            let res = check_status(res).await?;
            let body = res.json::<serde_json::Value>().await?;
            tracing::debug!(body = ?body, "Completion response");

            return Ok::<serde_json::Value, TransportError>(body);
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(TransportError::Cancelled);
            }
            res = call => {
                return res;
            }
        }
    }
}
