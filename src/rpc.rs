//! JSON-RPC client for contract reads
//!
//! Issues `eth_call` requests against a network's endpoint and decodes the
//! single-word result. Every failure is mapped to a typed [`RpcError`]; no
//! retries happen here, the next poll cycle is the retry.

use crate::abi::{decode_quantity, CallData};
use crate::error::RpcError;
use crate::registry::EndpointConfig;
use crate::types::Quantity;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A read-only contract call against one network.
///
/// The fetcher only talks to networks through this trait.
#[async_trait]
pub trait ContractReader: Send + Sync {
    async fn call(
        &self,
        endpoint: &EndpointConfig,
        to: Address,
        data: &CallData,
    ) -> std::result::Result<Quantity, RpcError>;
}

/// JSON-RPC client shared by every network.
pub struct RpcClient {
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Create a client whose requests are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            next_id: AtomicU64::new(1),
        })
    }

    fn request_body(&self, to: Address, data: &CallData) -> Value {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "eth_call",
            "params": [
                { "to": format!("0x{:x}", to), "data": data.to_hex() },
                "latest"
            ]
        })
    }
}

#[async_trait]
impl ContractReader for RpcClient {
    async fn call(
        &self,
        endpoint: &EndpointConfig,
        to: Address,
        data: &CallData,
    ) -> std::result::Result<Quantity, RpcError> {
        let request = self.request_body(to, data);

        let response = self
            .client
            .post(&endpoint.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcError::unreachable(describe_transport_error(&e)))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| RpcError::unreachable(describe_transport_error(&e)))?;

        let json: Value = match serde_json::from_slice(&body) {
            Ok(json) => json,
            // an HTTP error page is a transport problem, not a bad payload
            Err(_) if !status.is_success() => {
                return Err(RpcError::unreachable(format!("HTTP {}", status)));
            }
            Err(e) => return Err(RpcError::malformed(format!("invalid JSON: {}", e))),
        };

        tracing::debug!(
            "eth_call {} on {} returned: {}",
            data,
            endpoint.network,
            json
        );
        parse_call_response(&json)
    }
}

/// Interpret a JSON-RPC response envelope.
pub fn parse_call_response(json: &Value) -> std::result::Result<Quantity, RpcError> {
    if !json.is_object() {
        return Err(RpcError::malformed("response is not an object"));
    }

    if let Some(error) = json.get("error").filter(|e| !e.is_null()) {
        if !error.is_object() {
            return Err(RpcError::malformed(format!(
                "'error' is not an object: {}",
                error
            )));
        }
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(RpcError::RpcReverted { code, message });
    }

    match json.get("result") {
        Some(Value::String(hex)) => Ok(decode_quantity(hex)),
        // no data for an uninitialized account
        Some(Value::Null) => Ok(decode_quantity("")),
        Some(other) => Err(RpcError::malformed(format!(
            "'result' is not a hex string: {}",
            other
        ))),
        None => Err(RpcError::malformed("response missing 'result' field")),
    }
}

fn describe_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{encode_call, BALANCE_OF};
    use crate::types::NetworkId;
    use alloy_primitives::{address, U256};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn endpoint(url: String) -> EndpointConfig {
        EndpointConfig {
            network: NetworkId::BASE,
            rpc_url: url,
            display_name: "Local".to_string(),
            explorer_url: String::new(),
            native_currency_symbol: "ETH".to_string(),
            native_currency_decimals: 18,
        }
    }

    /// Serve one canned HTTP response and hand back the raw request.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });
        (url, handle)
    }

    fn balance_call() -> CallData {
        encode_call(
            BALANCE_OF,
            Some(address!("0742d35Cc6634C0532925a3b844Bc9e7595f0bEb")),
        )
    }

    #[test]
    fn test_parse_result() {
        let json = json!({"jsonrpc": "2.0", "id": 1, "result": "0x0de0b6b3a7640000"});
        assert_eq!(
            parse_call_response(&json).unwrap(),
            U256::from(1_000_000_000_000_000_000u64)
        );
    }

    #[test]
    fn test_parse_empty_result_is_zero() {
        let json = json!({"jsonrpc": "2.0", "id": 1, "result": "0x"});
        assert_eq!(parse_call_response(&json).unwrap(), U256::ZERO);
        let json = json!({"jsonrpc": "2.0", "id": 1, "result": null});
        assert_eq!(parse_call_response(&json).unwrap(), U256::ZERO);
    }

    #[test]
    fn test_parse_error_object() {
        let json = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": 3, "message": "execution reverted"}
        });
        assert_eq!(
            parse_call_response(&json).unwrap_err(),
            RpcError::RpcReverted {
                code: 3,
                message: "execution reverted".to_string()
            }
        );
    }

    #[test]
    fn test_parse_malformed() {
        for json in [
            json!({"jsonrpc": "2.0", "id": 1}),
            json!({"jsonrpc": "2.0", "id": 1, "result": 42}),
            json!([1, 2, 3]),
            json!({"jsonrpc": "2.0", "id": 1, "error": "boom"}),
            json!({"jsonrpc": "2.0", "id": 1, "error": -32000}),
        ] {
            assert!(matches!(
                parse_call_response(&json),
                Err(RpcError::MalformedResponse { .. })
            ));
        }
    }

    #[test]
    fn test_request_body_shape() {
        let client = RpcClient::new(Duration::from_secs(1)).unwrap();
        let to = address!("093D6B75b07d61C5fA754C20F8c4E4dFD6C02e7F");
        let body = client.request_body(to, &balance_call());
        assert_eq!(body["method"], "eth_call");
        assert_eq!(body["params"][0]["to"], "0x093d6b75b07d61c5fa754c20f8c4e4dfd6c02e7f");
        assert_eq!(body["params"][1], "latest");
        assert_eq!(body["params"][0]["data"], balance_call().to_hex());
    }

    #[tokio::test]
    async fn test_call_against_local_server() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"jsonrpc":"2.0","id":1,"result":"0x0de0b6b3a7640000"}"#,
        )
        .await;
        let client = RpcClient::new(Duration::from_secs(5)).unwrap();
        let to = address!("093D6B75b07d61C5fA754C20F8c4E4dFD6C02e7F");

        let value = client.call(&endpoint(url), to, &balance_call()).await.unwrap();
        assert_eq!(value, U256::from(1_000_000_000_000_000_000u64));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST "));
        assert!(request.contains("eth_call"));
    }

    #[tokio::test]
    async fn test_call_non_json_body_is_malformed() {
        let (url, _server) = serve_once("200 OK", "not json").await;
        let client = RpcClient::new(Duration::from_secs(5)).unwrap();
        let to = address!("093D6B75b07d61C5fA754C20F8c4E4dFD6C02e7F");

        let err = client.call(&endpoint(url), to, &balance_call()).await.unwrap_err();
        assert!(matches!(err, RpcError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_call_http_error_is_unreachable() {
        let (url, _server) = serve_once("503 Service Unavailable", "upstream down").await;
        let client = RpcClient::new(Duration::from_secs(5)).unwrap();
        let to = address!("093D6B75b07d61C5fA754C20F8c4E4dFD6C02e7F");

        let err = client.call(&endpoint(url), to, &balance_call()).await.unwrap_err();
        assert!(matches!(err, RpcError::NetworkUnreachable { .. }));
    }

    #[tokio::test]
    async fn test_call_connection_refused_is_unreachable() {
        // bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = RpcClient::new(Duration::from_secs(5)).unwrap();
        let to = address!("093D6B75b07d61C5fA754C20F8c4E4dFD6C02e7F");
        let err = client.call(&endpoint(url), to, &balance_call()).await.unwrap_err();
        assert!(matches!(err, RpcError::NetworkUnreachable { .. }));
    }
}
