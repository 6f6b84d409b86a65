//! HTTP helpers shared by the streaming backends.

use std::path::Path;

use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::BackendError;
use crate::config::PullerConfig;
use crate::progress::Progress;

/// Build the shared HTTP client.
pub(crate) fn client(config: &PullerConfig) -> Result<Client, BackendError> {
    let client = Client::builder()
        .timeout(config.request_timeout)
        .danger_accept_invalid_certs(config.no_https)
        .user_agent(concat!("imgpull/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Map non-success statuses to backend errors.
pub(crate) fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    match status {
        StatusCode::NOT_FOUND => Err(BackendError::NotFound(url)),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(BackendError::AuthRequired(url)),
        _ => Err(BackendError::Status {
            status: status.as_u16(),
            url,
        }),
    }
}

/// Stream a response body into `dest`, creating or truncating it.
///
/// Returns the number of bytes written.
pub(crate) async fn download(
    response: Response,
    dest: &Path,
    progress: &dyn Progress,
) -> Result<u64, BackendError> {
    let response = check_status(response)?;
    debug!(url = %response.url(), dest = %dest.display(), "Downloading");

    progress.start(response.content_length());

    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        progress.advance(chunk.len() as u64);
    }
    file.flush().await?;
    file.sync_all().await?;

    progress.finish();
    Ok(written)
}
