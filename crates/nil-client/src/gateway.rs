//! HTTP API shared by the gateway, storage providers and the overlay bridge

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RANGE};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::transport::TransportError;

pub const HEADER_PROVIDER: &str = "X-Nil-Provider";
pub const HEADER_SESSION_ID: &str = "X-Nil-Session-Id";
pub const HEADER_DOWNLOAD_SESSION: &str = "X-Nil-Download-Session";
pub const HEADER_REQ_SIG: &str = "X-Nil-Req-Sig";
pub const HEADER_REQ_NONCE: &str = "X-Nil-Req-Nonce";
pub const HEADER_REQ_EXPIRES_AT: &str = "X-Nil-Req-Expires-At";
pub const HEADER_REQ_RANGE_START: &str = "X-Nil-Req-Range-Start";
pub const HEADER_REQ_RANGE_LEN: &str = "X-Nil-Req-Range-Len";

/// Error text a provider returns when a read needs a signed request
pub const AUTH_REQUIRED_TEXT: &str = "req_sig is required";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NilfsFileEntry {
    pub path: String,
    pub size_bytes: u64,
    pub start_offset: u64,
    #[serde(default)]
    pub flags: u32,
}

#[derive(Debug, Deserialize)]
struct ListFilesResponse {
    #[serde(default)]
    files: Vec<NilfsFileEntry>,
}

/// Provider assignment and blob coordinates for one sub-range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalPlan {
    pub deal_id: u64,
    pub owner: String,
    pub provider: String,
    pub manifest_root: String,
    pub file_path: String,
    pub range_start: u64,
    pub range_len: u64,
    pub start_mdu_index: u64,
    pub start_blob_index: u32,
    pub blob_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSession {
    pub download_session: String,
    pub deal_id: u64,
    pub provider: String,
    pub file_path: String,
    #[serde(default)]
    pub expires_at: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    hint: Option<String>,
}

/// Identifies a file inside a deal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLocator {
    pub manifest_root: String,
    pub deal_id: u64,
    pub owner: String,
    pub file_path: String,
}

impl FileLocator {
    fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("deal_id", self.deal_id.to_string()),
            ("owner", self.owner.clone()),
            ("file_path", self.file_path.clone()),
        ]
    }
}

/// Owner-signed authorization presented with a range read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRangeRequest {
    pub signature: String,
    pub nonce: u64,
    pub expires_at: u64,
    pub range_start: u64,
    pub range_len: u64,
}

impl SignedRangeRequest {
    fn apply(&self, headers: &mut HeaderMap) -> Result<(), TransportError> {
        insert(headers, HEADER_REQ_SIG, &self.signature)?;
        insert(headers, HEADER_REQ_NONCE, &self.nonce.to_string())?;
        insert(headers, HEADER_REQ_EXPIRES_AT, &self.expires_at.to_string())?;
        insert(headers, HEADER_REQ_RANGE_START, &self.range_start.to_string())?;
        insert(headers, HEADER_REQ_RANGE_LEN, &self.range_len.to_string())?;
        Ok(())
    }
}

/// Authorization presented with a range read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeAuth {
    pub session_id: Option<String>,
    pub download_session: Option<String>,
    pub signed: Option<SignedRangeRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedRange {
    pub bytes: Vec<u8>,
    /// Identity asserted by the responder
    pub provider: String,
}

/// Client for the `/gateway/*` surface
#[derive(Debug, Clone)]
pub struct NilHttpClient {
    http: Client,
}

impl Default for NilHttpClient {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

impl NilHttpClient {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    pub fn with_connect_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let http = Client::builder().connect_timeout(timeout).build()?;
        Ok(Self::new(http))
    }

    pub async fn list_files(
        &self,
        base: &str,
        manifest_root: &str,
        deal_id: u64,
        owner: &str,
    ) -> Result<Vec<NilfsFileEntry>, TransportError> {
        let url = format!("{}/gateway/list-files/{}", trim(base), manifest_root);
        let resp = self
            .http
            .get(&url)
            .query(&[("deal_id", deal_id.to_string()), ("owner", owner.to_string())])
            .send()
            .await?;
        let body: ListFilesResponse = check(resp).await?.json().await?;
        Ok(body.files)
    }

    pub async fn plan_retrieval_session(
        &self,
        base: &str,
        file: &FileLocator,
        range_start: u64,
        range_len: u64,
    ) -> Result<RetrievalPlan, TransportError> {
        let url = format!("{}/gateway/plan-retrieval-session/{}", trim(base), file.manifest_root);
        let mut query = file.query();
        query.push(("range_start", range_start.to_string()));
        query.push(("range_len", range_len.to_string()));

        let resp = self.http.get(&url).query(&query).send().await?;
        let plan: RetrievalPlan = check(resp).await?.json().await?;
        if plan.provider.is_empty() {
            return Err(TransportError::invalid_response("plan response has no provider"));
        }
        Ok(plan)
    }

    /// Read `range_len` bytes at `range_start`
    ///
    /// The responder must name itself in `X-Nil-Provider`. When
    /// `expected_provider` is set, any other identity is a provider mismatch.
    pub async fn fetch_range(
        &self,
        base: &str,
        file: &FileLocator,
        range_start: u64,
        range_len: u64,
        auth: &RangeAuth,
        expected_provider: Option<&str>,
    ) -> Result<FetchedRange, TransportError> {
        if range_len == 0 {
            return Err(TransportError::invalid_response("empty range"));
        }
        let url = format!("{}/gateway/fetch/{}", trim(base), file.manifest_root);

        let mut headers = HeaderMap::new();
        headers.insert(RANGE, header_value(&range_header(range_start, range_len))?);
        if let Some(session_id) = &auth.session_id {
            insert(&mut headers, HEADER_SESSION_ID, session_id)?;
        }
        if let Some(download_session) = &auth.download_session {
            insert(&mut headers, HEADER_DOWNLOAD_SESSION, download_session)?;
        }
        if let Some(signed) = &auth.signed {
            signed.apply(&mut headers)?;
        }

        let resp = self.http.get(&url).query(&file.query()).headers(headers).send().await?;
        let resp = check(resp).await?;

        let provider = resp
            .headers()
            .get(HEADER_PROVIDER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| TransportError::invalid_response("response is missing X-Nil-Provider"))?;

        if let Some(expected) = expected_provider {
            if provider != expected {
                return Err(TransportError::provider_mismatch(expected, &provider));
            }
        }

        let bytes = resp.bytes().await?.to_vec();
        Ok(FetchedRange { bytes, provider })
    }

    /// Open a short-lived download session with one signed request
    pub async fn open_download_session(
        &self,
        base: &str,
        file: &FileLocator,
        signed: &SignedRangeRequest,
    ) -> Result<DownloadSession, TransportError> {
        let url = format!("{}/gateway/open-session/{}", trim(base), file.manifest_root);
        let mut headers = HeaderMap::new();
        signed.apply(&mut headers)?;

        let resp = self.http.post(&url).query(&file.query()).headers(headers).send().await?;
        let session: DownloadSession = check(resp).await?.json().await?;
        if session.download_session.is_empty() {
            return Err(TransportError::invalid_response("open-session returned no session"));
        }
        Ok(session)
    }

    /// Ask the gateway to submit the provider's proof for a confirmed session
    pub async fn submit_session_proof(&self, base: &str, session_id: &str) -> Result<(), TransportError> {
        let url = format!("{}/gateway/session-proof", trim(base));
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "session_id": session_id }))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }
}

/// Inclusive `bytes=start-end` header for a half-open window
pub fn range_header(range_start: u64, range_len: u64) -> String {
    format!("bytes={}-{}", range_start, range_start + range_len.saturating_sub(1))
}

/// The backend refused an unsigned read
pub fn is_auth_required(message: &str) -> bool {
    message.contains(AUTH_REQUIRED_TEXT)
}

async fn check(resp: Response) -> Result<Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    Err(TransportError::http(status.as_u16(), error_message(&text, status.as_u16())))
}

/// `error (hint)` from a JSON error body, else the raw text
fn error_message(text: &str, status: u16) -> String {
    match serde_json::from_str::<ErrorBody>(text) {
        Ok(body) => match body.hint.filter(|h| !h.is_empty()) {
            Some(hint) => format!("{} ({})", body.error, hint),
            None => body.error,
        },
        Err(_) if text.trim().is_empty() => format!("HTTP {}", status),
        Err(_) => text.trim().to_string(),
    }
}

fn trim(base: &str) -> &str {
    base.trim_end_matches('/')
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value).map_err(|e| TransportError::invalid_response(format!("bad header value: {}", e)))
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<(), TransportError> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| TransportError::invalid_response(format!("bad header name: {}", e)))?;
    headers.insert(name, header_value(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ErrorClass;
    use axum::{
        extract::Path,
        http::{HeaderMap as AxumHeaders, StatusCode},
        response::IntoResponse,
        routing::get,
        Json, Router,
    };
    use serde_json::json;

    fn file() -> FileLocator {
        FileLocator {
            manifest_root: "0xroot".into(),
            deal_id: 3,
            owner: "nil1owner".into(),
            file_path: "a.bin".into(),
        }
    }

    async fn fetch_handler(Path(_root): Path<String>, headers: AxumHeaders) -> impl IntoResponse {
        let range = headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        match range.as_str() {
            "bytes=0-3" => (StatusCode::PARTIAL_CONTENT, [("X-Nil-Provider", "sp-1")], b"abcd".to_vec()).into_response(),
            "bytes=4-7" => (StatusCode::PARTIAL_CONTENT, b"efgh".to_vec()).into_response(),
            _ => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "slab not found on disk", "hint": "try another provider" })),
            )
                .into_response(),
        }
    }

    async fn spawn() -> String {
        let app = Router::new().route("/gateway/fetch/{root}", get(fetch_handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_range_header_is_inclusive() {
        assert_eq!(range_header(0, 1), "bytes=0-0");
        assert_eq!(range_header(100, 50), "bytes=100-149");
    }

    #[test]
    fn test_error_message_formats() {
        assert_eq!(
            error_message(r#"{"error":"file not found in deal","hint":"check path"}"#, 404),
            "file not found in deal (check path)"
        );
        assert_eq!(error_message(r#"{"error":"req_sig is required"}"#, 401), "req_sig is required");
        assert_eq!(error_message("", 502), "HTTP 502");
        assert_eq!(error_message("plain text", 500), "plain text");
    }

    #[test]
    fn test_auth_required_detection() {
        assert!(is_auth_required("req_sig is required"));
        assert!(!is_auth_required("forbidden"));
    }

    #[tokio::test]
    async fn test_fetch_range_checks_provider() {
        let base = spawn().await;
        let client = NilHttpClient::default();

        let ok = client
            .fetch_range(&base, &file(), 0, 4, &RangeAuth::default(), Some("sp-1"))
            .await
            .unwrap();
        assert_eq!(ok.bytes, b"abcd");
        assert_eq!(ok.provider, "sp-1");

        let mismatch = client
            .fetch_range(&base, &file(), 0, 4, &RangeAuth::default(), Some("sp-2"))
            .await
            .unwrap_err();
        assert_eq!(mismatch.class, ErrorClass::ProviderMismatch);

        let missing = client
            .fetch_range(&base, &file(), 4, 4, &RangeAuth::default(), None)
            .await
            .unwrap_err();
        assert_eq!(missing.class, ErrorClass::InvalidResponse);
    }

    #[tokio::test]
    async fn test_fetch_range_error_body() {
        let base = spawn().await;
        let err = NilHttpClient::default()
            .fetch_range(&base, &file(), 100, 4, &RangeAuth::default(), None)
            .await
            .unwrap_err();
        assert_eq!(err.class, ErrorClass::Http4xx);
        assert_eq!(err.status, Some(404));
        assert_eq!(err.message, "slab not found on disk (try another provider)");
    }
}
