//! reqwest transport for the `oauth2` crate
//!
//! Token requests go through [`execute`]. Each provider builds one client
//! with [`build_client`]: no redirect following, bounded request time.

use std::time::Duration;

/// Errors raised while bridging an OAuth2 request onto reqwest
#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    /// Transport failure, including timeouts
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response could not be rebuilt as an `http::Response`
    #[error("Invalid HTTP response: {0}")]
    Response(#[from] http::Error),
}

/// Build the reqwest client used for every provider call
///
/// # Errors
///
/// Returns `reqwest::Error` if the TLS backend cannot be initialized
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .user_agent(concat!("idgate/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Send an `oauth2` request and buffer the whole response
///
/// # Errors
///
/// Returns [`HttpClientError`] if sending fails (timeouts included) or the
/// response cannot be read
pub async fn execute(
    client: reqwest::Client,
    request: oauth2::HttpRequest,
) -> Result<oauth2::HttpResponse, HttpClientError> {
    let (parts, body) = request.into_parts();
    let response = client
        .request(parts.method, parts.uri.to_string())
        .headers(parts.headers)
        .body(body)
        .send()
        .await?;

    let mut rebuilt = http::Response::builder().status(response.status());
    if let Some(headers) = rebuilt.headers_mut() {
        headers.extend(response.headers().clone());
    }
    let body = response.bytes().await?.to_vec();
    Ok(rebuilt.body(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_client_with_timeout() {
        assert!(build_client(Duration::from_secs(10)).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let client = build_client(Duration::from_millis(200)).unwrap();
        let request = http::Request::builder()
            .method(http::Method::POST)
            .uri("http://127.0.0.1:9/token")
            .body(Vec::new())
            .unwrap();

        let result = execute(client, request).await;
        assert!(matches!(result, Err(HttpClientError::Transport(_))));
    }
}
