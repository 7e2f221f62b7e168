//! HTTP transport backed by reqwest.
//!
//! Endpoints, relative to the configured base URL:
//! - `POST /device/register` with `{"userId": ...}`
//! - `POST /sync/messages/{entityType}` with a JSON array of message strings
//! - `GET /sync/messages`
//!
//! Every reply uses the `{code, message, data}` envelope.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use sync_types::{EntityType, UploadResponse, UserId, WireMessage};

use super::{RequestContext, SyncTransport, TransportError, DEVICE_ID_HEADER};

const MAX_ERROR_BODY: usize = 512;

/// Production transport for the Tabula sync server.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    client: Client,
}

impl HttpTransport {
    /// Create a transport for `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(map_reqwest_error)?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// The base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder, ctx: &RequestContext) -> RequestBuilder {
        let request = request
            .header(DEVICE_ID_HEADER, ctx.device_id.as_str())
            .header(reqwest::header::ACCEPT, "application/json");
        match &ctx.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<UploadResponse, TransportError> {
        let response = request.send().await.map_err(map_reqwest_error)?;
        let response = check_status(response).await?;
        response
            .json::<UploadResponse>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn register_device(
        &self,
        ctx: &RequestContext,
        user: &UserId,
    ) -> Result<bool, TransportError> {
        let request = self
            .client
            .post(self.url("/device/register"))
            .json(&json!({ "userId": user.as_str(), "deviceId": ctx.device_id.as_str() }));
        let response = self.send(self.authorize(request, ctx)).await?;
        if !response.is_ok() {
            tracing::warn!(
                code = response.code,
                "Device registration rejected: {}",
                response.message
            );
        }
        Ok(response.is_ok())
    }

    async fn upload_messages(
        &self,
        ctx: &RequestContext,
        entity_type: EntityType,
        messages: Vec<String>,
    ) -> Result<UploadResponse, TransportError> {
        let request = self
            .client
            .post(self.url(&format!("/sync/messages/{}", entity_type.as_str())))
            .json(&messages);
        self.send(self.authorize(request, ctx)).await
    }

    async fn get_messages(&self, ctx: &RequestContext) -> Result<Vec<WireMessage>, TransportError> {
        let request = self.client.get(self.url("/sync/messages"));
        let response = self.send(self.authorize(request, ctx)).await?;
        if !response.is_ok() {
            return Err(TransportError::Decode(format!(
                "server code {}: {}",
                response.code, response.message
            )));
        }
        decode_messages(response.data)
    }
}

async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(TransportError::Http {
        status: status.as_u16(),
        body,
    })
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_decode() {
        TransportError::Decode(error.to_string())
    } else {
        TransportError::Connection(error.to_string())
    }
}

/// Decode the `data` field of a download reply.
///
/// Elements may be message objects or message objects encoded as strings,
/// which is how they were uploaded. An element that does not decode is
/// logged and dropped; its siblings are still returned.
fn decode_messages(data: Option<Value>) -> Result<Vec<WireMessage>, TransportError> {
    let items = match data {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(TransportError::Decode(format!(
                "expected message array, got {other}"
            )))
        }
    };

    let mut messages = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let decoded = match item {
            Value::String(raw) => WireMessage::from_json(&raw).map_err(|e| e.to_string()),
            other => serde_json::from_value(other).map_err(|e| e.to_string()),
        };
        match decoded {
            Ok(message) => messages.push(message),
            Err(error) => {
                tracing::warn!(index, error = %error, "Skipping undecodable inbound message");
            }
        }
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_json() -> Value {
        json!({
            "entityType": "Table",
            "operationType": "ADD",
            "deviceId": "dev-b",
            "timestamp": {"wallClockTime": 5, "logicalTime": 0, "nodeId": "dev-b"},
            "payload": {"tableName": "Spring"},
            "userId": "u1"
        })
    }

    #[test]
    fn decodes_objects_and_strings() {
        let data = json!([message_json(), message_json().to_string()]);
        let messages = decode_messages(Some(data)).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], messages[1]);
        assert_eq!(messages[0].entity_type, "Table");
    }

    #[test]
    fn bad_element_does_not_drop_siblings() {
        let mut unknown_op = message_json();
        unknown_op["operationType"] = json!("MOVE");
        let mut negative_counter = message_json();
        negative_counter["timestamp"]["logicalTime"] = json!(-1);
        let data = json!([
            message_json(),
            unknown_op,
            "{not json",
            negative_counter,
            message_json().to_string()
        ]);

        let messages = decode_messages(Some(data)).unwrap();

        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.entity_type == "Table"));
    }

    #[test]
    fn missing_data_is_empty() {
        assert!(decode_messages(None).unwrap().is_empty());
        assert!(decode_messages(Some(Value::Null)).unwrap().is_empty());
    }

    #[test]
    fn non_array_data_is_decode_error() {
        let err = decode_messages(Some(json!({"oops": true}))).unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let transport = HttpTransport::new("https://sync.example/api/", Duration::from_secs(5)).unwrap();
        assert_eq!(transport.base_url(), "https://sync.example/api");
        assert_eq!(
            transport.url("/sync/messages"),
            "https://sync.example/api/sync/messages"
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_retryable() {
        // Port 9 (discard) on localhost is closed in test environments.
        let transport = HttpTransport::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let ctx = RequestContext::new("dev-a".parse().unwrap());
        let err = transport.get_messages(&ctx).await.unwrap_err();
        assert!(err.is_retryable(), "unexpected error {err:?}");
    }
}
