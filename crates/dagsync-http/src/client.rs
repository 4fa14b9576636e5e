//! reqwest client implementing [`Transport`] against a dagsync HTTP server.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;

use dagsync_core::{BlockId, DagInfo, Manifest};
use dagsync_sync::{ErrorCode, Meta, Result, SessionId, SyncError, Transport, TransferOutcome, WireError};

use crate::{
    PARAM_BLOCK, PARAM_CID, PARAM_HASH, PARAM_MANIFEST, PARAM_PIN, PARAM_SID, RESERVED_PARAMS,
    SESSION_HEADER,
};

/// A remote peer reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    url: String,
}

impl HttpClient {
    /// Client for the server at `url`, e.g. `http://127.0.0.1:8080/`.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    /// Use a preconfigured reqwest client (timeouts, proxies).
    pub fn with_client(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send(&self, op: &'static str, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(|e| transport(op, e))?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(failure(op, response).await.into_error_for(op))
    }
}

/// Metadata pairs safe to put on the query string.
fn meta_pairs(meta: &Meta) -> Vec<(&str, &str)> {
    meta.iter()
        .filter(|(k, _)| {
            let reserved = RESERVED_PARAMS.contains(&k.as_str());
            if reserved {
                tracing::warn!(key = %k, "dropping metadata key that collides with a query parameter");
            }
            !reserved
        })
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

fn transport(op: &'static str, err: reqwest::Error) -> SyncError {
    SyncError::Transport {
        op,
        message: err.to_string(),
    }
}

/// A non-success reply, classified.
struct Failure {
    retryable: bool,
    wire: WireError,
}

impl Failure {
    fn into_error_for(self, op: &'static str) -> SyncError {
        if self.retryable {
            SyncError::Transport {
                op,
                message: self.wire.message,
            }
        } else {
            self.wire.into_error()
        }
    }

    fn into_outcome(self, id: BlockId) -> TransferOutcome {
        if self.retryable {
            TransferOutcome::Retryable {
                id,
                cause: self.wire,
            }
        } else {
            TransferOutcome::Fatal {
                id,
                cause: self.wire,
            }
        }
    }
}

async fn failure(op: &'static str, response: reqwest::Response) -> Failure {
    let status = response.status();
    let body = response.bytes().await.unwrap_or_default();
    let wire = serde_json::from_slice::<WireError>(&body).unwrap_or_else(|_| {
        WireError::new(
            code_for(status),
            format!("{op}: {status} {}", String::from_utf8_lossy(&body)),
        )
    });

    // 501 is a definite answer ("remove not supported"), not an outage.
    let retryable = (status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED)
        || wire.code.is_retryable();
    Failure { retryable, wire }
}

fn code_for(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ErrorCode::InvalidRequest,
        StatusCode::NOT_FOUND => ErrorCode::NotFound,
        StatusCode::NOT_IMPLEMENTED => ErrorCode::RemoveNotSupported,
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => ErrorCode::Rejected,
        StatusCode::SERVICE_UNAVAILABLE => ErrorCode::Unavailable,
        s if s.is_server_error() => ErrorCode::Internal,
        _ => ErrorCode::Unknown,
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn open_receive_session(
        &self,
        info: &DagInfo,
        pin_on_complete: bool,
        meta: &Meta,
    ) -> Result<(SessionId, Manifest)> {
        let op = "open_receive_session";
        let request = self
            .http
            .post(&self.url)
            .query(&[(PARAM_PIN, if pin_on_complete { "true" } else { "false" })])
            .query(&meta_pairs(meta))
            .json(info);
        let response = self.send(op, request).await?;

        let session = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(SessionId::from)
            .ok_or_else(|| SyncError::Protocol(format!("response has no `{SESSION_HEADER}` header")))?;
        let diff: Manifest = response.json().await.map_err(|e| transport(op, e))?;
        Ok((session, diff))
    }

    async fn push_block(&self, session: &SessionId, id: &BlockId, data: Bytes) -> TransferOutcome {
        let op = "push_block";
        let hash = id.to_hex();
        let request = self
            .http
            .put(&self.url)
            .query(&[(PARAM_SID, session.as_str()), (PARAM_HASH, hash.as_str())])
            .body(data);

        match request.send().await {
            Ok(response) if response.status().is_success() => TransferOutcome::Stored(*id),
            Ok(response) => failure(op, response).await.into_outcome(*id),
            Err(err) => TransferOutcome::from_error(*id, &transport(op, err)),
        }
    }

    async fn fetch_dag_info(&self, root: &BlockId, meta: &Meta) -> Result<DagInfo> {
        let op = "fetch_dag_info";
        let root = root.to_hex();
        let request = self
            .http
            .get(&self.url)
            .query(&[(PARAM_MANIFEST, root.as_str())])
            .query(&meta_pairs(meta));
        let response = self.send(op, request).await?;
        response.json().await.map_err(|e| transport(op, e))
    }

    async fn fetch_block(&self, id: &BlockId) -> Result<Bytes> {
        let op = "fetch_block";
        let hex = id.to_hex();
        let request = self.http.get(&self.url).query(&[(PARAM_BLOCK, hex.as_str())]);
        let response = self.send(op, request).await?;
        response.bytes().await.map_err(|e| transport(op, e))
    }

    async fn remove_dag(&self, root: &BlockId, meta: &Meta) -> Result<()> {
        let op = "remove_dag";
        let root = root.to_hex();
        let request = self
            .http
            .delete(&self.url)
            .query(&[(PARAM_CID, root.as_str())])
            .query(&meta_pairs(meta));
        self.send(op, request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_classify() {
        assert_eq!(code_for(StatusCode::NOT_IMPLEMENTED), ErrorCode::RemoveNotSupported);
        assert_eq!(code_for(StatusCode::BAD_GATEWAY), ErrorCode::Internal);
        assert_eq!(code_for(StatusCode::NOT_FOUND), ErrorCode::NotFound);
    }

    #[test]
    fn test_reserved_meta_keys_dropped() {
        let mut meta = Meta::new();
        meta.insert("sid".into(), "spoofed".into());
        meta.insert("token".into(), "t".into());
        assert_eq!(meta_pairs(&meta), vec![("token", "t")]);
    }
}
