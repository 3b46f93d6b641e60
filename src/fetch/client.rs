use super::FetchError;
use crate::config::HttpConfig;
use crate::{ConfigError, EtlError};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// A decoded JSON response together with the exact bytes it was decoded from
#[derive(Debug, Clone)]
pub struct JsonPayload {
    pub raw: Vec<u8>,
    pub value: Value,
}

/// Builds the shared HTTP client with the injected request headers
///
/// # Arguments
///
/// * `config` - The HTTP configuration resolved at start-up
///
/// # Returns
///
/// * `Ok(Client)` - Client sending `accept`, `accept-language` and, when a token is
///   configured, `authorization: Bearer <token>` on every request
/// * `Err(EtlError)` - A header value was not representable, or the client failed to build
pub fn build_http_client(config: &HttpConfig) -> Result<Client, EtlError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_LANGUAGE, header_value(&config.accept_language)?);

    if let Some(token) = config.auth_token.as_deref().filter(|t| !t.is_empty()) {
        let mut value = header_value(&format!("Bearer {}", token))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    let client = Client::builder()
        .user_agent(config.user_agent.as_str())
        .default_headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()?;

    Ok(client)
}

fn header_value(value: &str) -> Result<HeaderValue, ConfigError> {
    HeaderValue::from_str(value)
        .map_err(|_| ConfigError::Validation(format!("Invalid header value: {:?}", value)))
}

/// Fetches a URL and returns the body bytes of a 200 response
///
/// Any other status, including other 2xx codes, is reported as `FetchError::Http`.
pub async fn fetch_bytes(
    client: &Client,
    url: &str,
    timeout: Option<Duration>,
) -> Result<Vec<u8>, FetchError> {
    let mut request = client.get(url);
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }

    let response = request.send().await.map_err(|e| classify_error(url, e))?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(FetchError::Http {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response.bytes().await.map_err(|e| classify_error(url, e))?;
    Ok(body.to_vec())
}

/// Fetches a URL and decodes the 200 response body as JSON
pub async fn fetch_json(
    client: &Client,
    url: &str,
    timeout: Option<Duration>,
) -> Result<JsonPayload, FetchError> {
    let raw = fetch_bytes(client, url, timeout).await?;
    let value = serde_json::from_slice(&raw).map_err(|e| FetchError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    Ok(JsonPayload { raw, value })
}

fn classify_error(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_build_http_client() {
        let config = test_config("https://api.example.com");
        assert!(build_http_client(&config.http).is_ok());
    }

    #[test]
    fn test_invalid_header_value_is_config_error() {
        let mut config = test_config("https://api.example.com");
        config.http.accept_language = "en\nUS".to_string();
        let err = build_http_client(&config.http).unwrap_err();
        assert!(matches!(err, EtlError::Config(ConfigError::Validation(_))));
    }

    #[tokio::test]
    async fn test_fetch_json_sends_injected_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/car"))
            .and(header("authorization", "Bearer test-token"))
            .and(header("accept", "*/*"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"cars":[]}"#))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let client = build_http_client(&config.http).unwrap();
        let payload = fetch_json(&client, &format!("{}/search/car", server.uri()), None)
            .await
            .unwrap();

        assert_eq!(payload.raw, br#"{"cars":[]}"#.to_vec());
        assert!(payload.value["cars"].is_array());
    }

    #[tokio::test]
    async fn test_non_200_is_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/created"))
            .respond_with(ResponseTemplate::new(201).set_body_string("{}"))
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let client = build_http_client(&config.http).unwrap();

        let err = fetch_bytes(&client, &format!("{}/missing", server.uri()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Http { status: 404, .. }));

        let err = fetch_bytes(&client, &format!("{}/created", server.uri()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Http { status: 201, .. }));
    }

    #[tokio::test]
    async fn test_malformed_json_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let client = build_http_client(&config.http).unwrap();
        let err = fetch_json(&client, &server.uri(), None).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Decode);
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{}")
                    .set_delay(Duration::from_millis(1500)),
            )
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let client = build_http_client(&config.http).unwrap();
        let err = fetch_bytes(&client, &server.uri(), Some(Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_refused_connection_is_transport_error() {
        let config = test_config("http://127.0.0.1:9");
        let client = build_http_client(&config.http).unwrap();
        let err = fetch_bytes(&client, "http://127.0.0.1:9/", Some(Duration::from_secs(2)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::Transport { .. } | FetchError::Timeout { .. }
        ));
    }
}
