//! Negotiation with the SignalR server.
//!
//! Before a transport is opened, the client issues an HTTP GET request to the
//! `/negotiate` endpoint to obtain a connection id and the server's keep-alive
//! and timeout settings.
//!
//! This module handles the negotiation request and parses the response.

use crate::error::SignalRError;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// The only protocol version this client speaks.
pub const PROTOCOL_VERSION: &str = "1.1";

/// Response from the `/negotiate` endpoint.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct NegotiateResponse {
    #[serde(rename = "Url")]
    pub url: Option<String>,
    #[serde(rename = "ConnectionId")]
    pub connection_id: Option<String>,
    #[serde(rename = "WebSocketServerUrl")]
    pub web_socket_server_url: Option<String>,
    /// Seconds.
    #[serde(rename = "DisconnectTimeout")]
    pub disconnect_timeout: Option<f64>,
    /// Seconds; absent when the server does not send keep-alives.
    #[serde(rename = "KeepAlive")]
    pub keep_alive: Option<f64>,
    #[serde(rename = "ProtocolVersion")]
    pub protocol_version: Option<String>,
}

impl NegotiateResponse {
    /// Disconnect timeout converted from seconds, when the server sent a
    /// non-negative number that fits a [`Duration`].
    pub fn disconnect_timeout(&self) -> Option<Duration> {
        self.disconnect_timeout.and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Checks the negotiated protocol version.
    pub fn validate_protocol(&self) -> Result<(), SignalRError> {
        match self.protocol_version.as_deref() {
            Some(PROTOCOL_VERSION) => Ok(()),
            other => Err(SignalRError::IncompatibleProtocol {
                got: other.map(str::to_string),
            }),
        }
    }
}

/// Builds `<url>/negotiate`, carrying over the base query and the extra query string.
pub fn negotiate_url(base_url: &Url, query_string: Option<&str>) -> Url {
    let mut negotiate_url = base_url.clone();

    let mut path = negotiate_url.path().to_string();
    if path.ends_with('/') {
        path.pop();
    }
    path.push_str("/negotiate");
    negotiate_url.set_path(&path);
    negotiate_url.set_fragment(None);

    let query = [base_url.query(), query_string.map(|q| q.trim_start_matches('?'))]
        .into_iter()
        .flatten()
        .filter(|q| !q.is_empty())
        .collect::<Vec<_>>()
        .join("&");
    negotiate_url.set_query(if query.is_empty() { None } else { Some(query.as_str()) });

    negotiate_url
}

/// Performs the negotiate request.
///
/// # Returns
///
/// * `Ok(NegotiateResponse)` - The parsed response; the protocol version is not checked here.
/// * `Err(SignalRError::Negotiation)` - If the request fails, the server answers with a
///   non-success status, or the body is not a negotiate response.
pub async fn negotiate(
    client: &reqwest::Client,
    base_url: &Url,
    query_string: Option<&str>,
) -> Result<NegotiateResponse, SignalRError> {
    let url = negotiate_url(base_url, query_string);
    debug!("Negotiate URL: {}", url);

    let response = client
        .get(url.as_str())
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| SignalRError::Negotiation(e.to_string()))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| SignalRError::Negotiation(e.to_string()))?;
    if !status.is_success() {
        debug!("Negotiate failed with {}: {}", status, body);
        return Err(SignalRError::Negotiation(format!("{status}: {body}")));
    }

    serde_json::from_str(&body).map_err(|e| SignalRError::Negotiation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_url() {
        let base = Url::parse("http://localhost:16418/signalr").unwrap();
        assert_eq!(
            negotiate_url(&base, None).as_str(),
            "http://localhost:16418/signalr/negotiate"
        );

        let base = Url::parse("http://localhost/signalr/?a=1#frag").unwrap();
        assert_eq!(
            negotiate_url(&base, Some("?token=x")).as_str(),
            "http://localhost/signalr/negotiate?a=1&token=x"
        );
    }

    #[test]
    fn test_parse_response() {
        let raw = r#"{
            "Url": "/signalr",
            "ConnectionId": "c1",
            "WebSocketServerUrl": null,
            "DisconnectTimeout": 40.0,
            "KeepAlive": 15.0,
            "ProtocolVersion": "1.1"
        }"#;
        let response: NegotiateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.connection_id.as_deref(), Some("c1"));
        assert_eq!(response.disconnect_timeout(), Some(Duration::from_secs(40)));
        assert_eq!(response.keep_alive, Some(15.0));
        assert!(response.validate_protocol().is_ok());
    }

    #[test]
    fn test_unusable_disconnect_timeout() {
        for secs in [1e30, -1.0, f64::NAN, f64::INFINITY] {
            let response = NegotiateResponse {
                disconnect_timeout: Some(secs),
                ..Default::default()
            };
            assert_eq!(response.disconnect_timeout(), None, "DisconnectTimeout = {secs}");
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_negotiation_error() {
        let base = Url::parse("http://127.0.0.1:1/signalr").unwrap();
        let result = negotiate(&reqwest::Client::new(), &base, None).await;
        assert!(matches!(result, Err(SignalRError::Negotiation(_))));
    }

    #[test]
    fn test_protocol_mismatch() {
        let response = NegotiateResponse {
            protocol_version: Some("1.0".into()),
            ..Default::default()
        };
        assert!(matches!(
            response.validate_protocol(),
            Err(SignalRError::IncompatibleProtocol { got: Some(v) }) if v == "1.0"
        ));

        let missing = NegotiateResponse::default();
        assert!(matches!(
            missing.validate_protocol(),
            Err(SignalRError::IncompatibleProtocol { got: None })
        ));
    }
}
