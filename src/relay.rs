// src/relay.rs
use ethers::types::{Address, Bytes, H256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AaError;

pub const RELAY_API_URL: &str = "https://api.gelato.digital";
pub const RELAY_STATUS_URL: &str = "https://relay.gelato.digital";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsoredCallRequest {
    pub chain_id: u64,
    pub target: Address,
    pub data: Bytes,
    pub user: Address,
    pub sponsor_api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SponsoredCallResponse {
    task_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub task_id: String,
    pub task_state: String,
    #[serde(default)]
    pub transaction_hash: Option<H256>,
    #[serde(default)]
    pub last_check_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskStatusResponse {
    task: TaskStatus,
}

/// Submits sponsored calls to a third-party relay network, the alternative
/// to bundler submission.
pub struct RelayClient {
    http: reqwest::Client,
    api_url: String,
    status_url: String,
    sponsor_api_key: String,
}

impl RelayClient {
    pub fn new(sponsor_api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: RELAY_API_URL.to_string(),
            status_url: RELAY_STATUS_URL.to_string(),
            sponsor_api_key: sponsor_api_key.into(),
        }
    }

    pub fn with_urls(mut self, api_url: impl Into<String>, status_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self.status_url = status_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn request(
        &self,
        chain_id: u64,
        target: Address,
        data: Bytes,
        user: Address,
    ) -> SponsoredCallRequest {
        SponsoredCallRequest {
            chain_id,
            target,
            data,
            user,
            sponsor_api_key: self.sponsor_api_key.clone(),
        }
    }

    /// Returns the relay task id
    pub async fn sponsored_call(
        &self,
        chain_id: u64,
        target: Address,
        data: Bytes,
        user: Address,
    ) -> Result<String, AaError> {
        let request = self.request(chain_id, target, data, user);
        debug!("Relaying sponsored call to {:?} on chain {}", target, chain_id);

        let response = self
            .http
            .post(format!("{}/relays/v2/sponsored-call", self.api_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| AaError::Relay(e.to_string()))?
            .error_for_status()
            .map_err(|e| AaError::Relay(e.to_string()))?
            .json::<SponsoredCallResponse>()
            .await
            .map_err(|e| AaError::Relay(e.to_string()))?;

        info!("Relay task created: {}", self.task_status_url(&response.task_id));
        Ok(response.task_id)
    }

    pub fn task_status_url(&self, task_id: &str) -> String {
        format!("{}/tasks/status/{}", self.status_url, task_id)
    }

    pub async fn task_status(&self, task_id: &str) -> Result<TaskStatus, AaError> {
        let response = self
            .http
            .get(self.task_status_url(task_id))
            .send()
            .await
            .map_err(|e| AaError::Relay(e.to_string()))?
            .error_for_status()
            .map_err(|e| AaError::Relay(e.to_string()))?
            .json::<TaskStatusResponse>()
            .await
            .map_err(|e| AaError::Relay(e.to_string()))?;
        Ok(response.task)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Answers each connection with `body`, recording the raw requests
    async fn serve_json(body: &'static str) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let request = read_request(&mut socket).await;
                recorded.lock().unwrap().push(request);
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}"), requests)
    }

    /// Reads a GET up to the blank line, a POST up to the end of its JSON body
    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while let Ok(n) = socket.read(&mut chunk).await {
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let done = if buf.starts_with(b"GET") {
                buf.ends_with(b"\r\n\r\n")
            } else {
                buf.ends_with(b"}")
            };
            if done {
                break;
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    #[test]
    fn request_serializes_in_camel_case() {
        let client = RelayClient::new("sponsor-key");
        let request = client.request(111, Address::repeat_byte(1), vec![0xab].into(), Address::repeat_byte(2));
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["chainId"], 111);
        assert_eq!(value["data"], "0xab");
        assert_eq!(value["sponsorApiKey"], "sponsor-key");
        assert!(value.get("user").is_some());
    }

    #[test]
    fn status_url_follows_task_pattern() {
        let client = RelayClient::new("k").with_urls("http://api/", "http://status/");
        assert_eq!(client.task_status_url("0xabc"), "http://status/tasks/status/0xabc");
        assert_eq!(
            RelayClient::new("k").task_status_url("1"),
            "https://relay.gelato.digital/tasks/status/1"
        );
    }

    #[tokio::test]
    async fn sponsored_call_returns_task_id() {
        let (url, requests) = serve_json(r#"{"taskId":"0xtask"}"#).await;
        let client = RelayClient::new("sponsor-key").with_urls(url.clone(), url);

        let task_id = client
            .sponsored_call(111, Address::repeat_byte(1), vec![0xab].into(), Address::repeat_byte(2))
            .await
            .unwrap();
        assert_eq!(task_id, "0xtask");

        let requests = requests.lock().unwrap();
        assert!(requests[0].starts_with("POST /relays/v2/sponsored-call"));
        assert!(requests[0].contains("\"sponsorApiKey\":\"sponsor-key\""));
    }

    #[tokio::test]
    async fn task_status_is_parsed() {
        let (url, _) =
            serve_json(r#"{"task":{"taskId":"0xtask","taskState":"ExecPending"}}"#).await;
        let client = RelayClient::new("k").with_urls(url.clone(), url);

        let status = client.task_status("0xtask").await.unwrap();
        assert_eq!(status.task_state, "ExecPending");
        assert_eq!(status.transaction_hash, None);
    }
}
