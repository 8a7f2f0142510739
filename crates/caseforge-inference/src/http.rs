//! HTTP plumbing shared by the model backends.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use caseforge_core::{Error, Result};

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Build a client with an overall request timeout.
pub(crate) fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Pass successful responses through; classify everything else.
///
/// 408, 429 and 5xx become transient errors, other statuses permanent.
pub(crate) async fn check_status(response: Response, service: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();
    Err(match Error::from_status(status.as_u16(), &body) {
        Error::TransientService(msg) => Error::TransientService(format!("{} {}", service, msg)),
        Error::PermanentService(msg) => Error::PermanentService(format!("{} {}", service, msg)),
        other => other,
    })
}

/// Decode a JSON body. A body that does not match `T` is a permanent error.
pub(crate) async fn parse_json<T: DeserializeOwned>(response: Response, service: &str) -> Result<T> {
    let bytes = response.bytes().await.map_err(Error::from)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        Error::PermanentService(format!("{} returned a malformed response: {}", service, e))
    })
}
