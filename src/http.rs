use std::fs::File;
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::error::BgdError;

const BASE_DELAY_MS: u64 = 200;

#[derive(Debug, Clone, Copy)]
pub struct HttpSettings {
    pub timeout: Duration,
    /// Transport-level retries on 429/5xx and connect errors. Pipeline steps
    /// themselves are never retried.
    pub max_retries: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            max_retries: 0,
        }
    }
}

pub fn user_agent() -> String {
    format!("bgd/{}", env!("CARGO_PKG_VERSION"))
}

pub fn build_client(settings: HttpSettings, mut headers: HeaderMap) -> Result<Client, BgdError> {
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&user_agent())
            .map_err(|err| BgdError::DownloadFailed(err.to_string()))?,
    );
    Client::builder()
        .default_headers(headers)
        .timeout(settings.timeout)
        .build()
        .map_err(|err| BgdError::DownloadFailed(err.to_string()))
}

pub fn send_with_retries<F>(max_retries: usize, mut make_req: F) -> Result<Response, BgdError>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 0usize;
    loop {
        match make_req().send() {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if attempt < max_retries && is_retryable_status(status) {
                    debug!(status, attempt, "retrying request");
                    backoff(attempt);
                    attempt += 1;
                    continue;
                }
                return Ok(resp);
            }
            Err(err) => {
                if attempt < max_retries && is_retryable_error(&err) {
                    debug!(error = %err, attempt, "retrying request");
                    backoff(attempt);
                    attempt += 1;
                    continue;
                }
                return Err(BgdError::DownloadFailed(err.to_string()));
            }
        }
    }
}

/// Fails on non-2xx, otherwise returns the response for reading.
pub fn ensure_success(response: Response) -> Result<Response, BgdError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let url = response.url().to_string();
    let body = response.text().unwrap_or_default();
    let message = match body.trim() {
        "" => url,
        text => format!("{url}: {}", truncate(text, 200)),
    };
    Err(BgdError::DownloadStatus { status, message })
}

pub fn write_response_to_file(response: Response, destination: &Path) -> Result<u64, BgdError> {
    let mut response = ensure_success(response)?;
    let mut file =
        File::create(destination).map_err(|err| BgdError::Filesystem(err.to_string()))?;
    std::io::copy(&mut response, &mut file).map_err(|err| BgdError::DownloadFailed(err.to_string()))
}

fn backoff(attempt: usize) {
    let delay = BASE_DELAY_MS * (attempt as u64 + 1);
    thread::sleep(Duration::from_millis(delay));
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
