// API client module: a small blocking HTTP client that talks to the MinerU
// extraction API. Every JSON endpoint answers with a `{code, msg, data}`
// envelope; `decode_envelope` turns that into typed data or an `ApiError`.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::task::ParseOptions;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 3;

const TASK_ENDPOINT: &str = "/api/v4/extract/task";
const UPLOAD_URLS_ENDPOINT: &str = "/api/v4/file-urls/batch";
const BATCH_RESULTS_ENDPOINT: &str = "/api/v4/extract-results/batch";

/// Operations the rest of the tool needs from the remote service. The real
/// implementation is [`ApiClient`]; tests use the generated mock.
#[cfg_attr(test, mockall::automock)]
pub trait ParseService {
    /// Register a URL parse job and return its task id.
    fn submit_url(&self, url: &str, options: &ParseOptions) -> Result<String, ApiError>;

    /// Request an upload slot for one local file, upload it, and return the
    /// batch id that tracks it.
    fn submit_file(&self, path: &Path, options: &ParseOptions) -> Result<String, ApiError>;

    fn task_status(&self, task_id: &str) -> Result<RemoteStatus, ApiError>;

    fn batch_status(&self, batch_id: &str) -> Result<Vec<RemoteStatus>, ApiError>;

    /// Fetch a result archive.
    fn download(&self, url: &str) -> Result<Vec<u8>, ApiError>;
}

/// Status of one remote job, as returned by both status endpoints.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RemoteStatus {
    pub task_id: Option<String>,
    pub file_name: Option<String>,
    pub state: String,
    pub full_zip_url: Option<String>,
    pub err_msg: Option<String>,
    pub extract_progress: Option<ExtractProgress>,
}

impl RemoteStatus {
    pub fn error_message(&self) -> String {
        self.err_msg
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or("unknown error")
            .to_string()
    }

    pub fn zip_url(&self) -> Option<&str> {
        self.full_zip_url.as_deref().filter(|u| !u.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExtractProgress {
    pub extracted_pages: u32,
    pub total_pages: u32,
    pub start_time: Option<String>,
}

#[derive(Serialize, Debug)]
struct UrlTaskRequest<'a> {
    url: &'a str,
    #[serde(flatten)]
    options: &'a ParseOptions,
}

#[derive(Serialize, Debug)]
struct UploadFile<'a> {
    name: &'a str,
}

#[derive(Serialize, Debug)]
struct UploadUrlsRequest<'a> {
    files: Vec<UploadFile<'a>>,
    #[serde(flatten)]
    options: &'a ParseOptions,
}

#[derive(Deserialize, Debug)]
struct TaskCreated {
    task_id: String,
}

#[derive(Deserialize, Debug)]
struct UploadUrls {
    batch_id: String,
    file_urls: Vec<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct BatchResults {
    extract_result: Vec<RemoteStatus>,
}

#[derive(Deserialize, Debug)]
struct Envelope {
    #[serde(default)]
    code: Value,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Blocking client holding the bearer token and base URL.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: String,
    backoff: Duration,
}

impl ApiClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(ApiClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            backoff: Duration::from_secs(1),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the service answers at all. Used by `diagnose`.
    pub fn ping(&self) -> Result<StatusCode, ApiError> {
        let res = self
            .client
            .get(&self.base_url)
            .timeout(Duration::from_secs(10))
            .send()?;
        Ok(res.status())
    }

    fn auth_headers(&self) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        let val = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|_| ApiError::Auth("token contains invalid characters".into()))?;
        headers.insert(AUTHORIZATION, val);
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        Ok(headers)
    }

    fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, endpoint);
        with_retries(MAX_ATTEMPTS, self.backoff, || {
            debug!(%method, %url, "API request");
            let mut req = self
                .client
                .request(method.clone(), &url)
                .headers(self.auth_headers()?);
            if let Some(body) = &body {
                req = req.json(body);
            }
            let res = req.send()?;
            let status = res.status();
            let text = res.text()?;
            decode_envelope(status, &text)
        })
    }

    fn upload(&self, path: &Path, upload_url: &str) -> Result<(), ApiError> {
        let bytes = fs::read(path).map_err(|source| ApiError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), size = bytes.len(), "Uploading file");
        // Pre-signed URL: no bearer header, no content type.
        let res = with_retries(MAX_ATTEMPTS, self.backoff, || {
            Ok(self.client.put(upload_url).body(bytes.clone()).send()?)
        })?;
        if !res.status().is_success() {
            let status = res.status();
            let txt = res.text().unwrap_or_default();
            return Err(ApiError::Service {
                code: status.as_u16().to_string(),
                message: format!("upload rejected: {}", txt.trim()),
            });
        }
        Ok(())
    }
}

impl ParseService for ApiClient {
    fn submit_url(&self, url: &str, options: &ParseOptions) -> Result<String, ApiError> {
        let body = to_body(&UrlTaskRequest { url, options })?;
        let created: TaskCreated = self.request(Method::POST, TASK_ENDPOINT, Some(body))?;
        Ok(created.task_id)
    }

    fn submit_file(&self, path: &Path, options: &ParseOptions) -> Result<String, ApiError> {
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ApiError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "file name is not valid UTF-8",
                ),
            })?;
        let body = to_body(&UploadUrlsRequest {
            files: vec![UploadFile { name }],
            options,
        })?;
        let slots: UploadUrls = self.request(Method::POST, UPLOAD_URLS_ENDPOINT, Some(body))?;
        let upload_url = slots.file_urls.first().ok_or_else(|| {
            ApiError::InvalidResponse("service returned no upload URL".into())
        })?;
        self.upload(path, upload_url)?;
        Ok(slots.batch_id)
    }

    fn task_status(&self, task_id: &str) -> Result<RemoteStatus, ApiError> {
        self.request(Method::GET, &format!("{TASK_ENDPOINT}/{task_id}"), None)
    }

    fn batch_status(&self, batch_id: &str) -> Result<Vec<RemoteStatus>, ApiError> {
        let results: BatchResults =
            self.request(Method::GET, &format!("{BATCH_RESULTS_ENDPOINT}/{batch_id}"), None)?;
        Ok(results.extract_result)
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let res = with_retries(MAX_ATTEMPTS, self.backoff, || Ok(self.client.get(url).send()?))?;
        if !res.status().is_success() {
            return Err(ApiError::Download(format!("server answered {}", res.status())));
        }
        let expected = res.content_length();
        let bytes = res
            .bytes()
            .map_err(|e| ApiError::Download(format!("reading archive body: {e}")))?;
        check_length(expected, bytes.len())?;
        Ok(bytes.to_vec())
    }
}

fn to_body<T: Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError::InvalidResponse(e.to_string()))
}

pub(crate) fn check_length(expected: Option<u64>, actual: usize) -> Result<(), ApiError> {
    match expected {
        Some(len) if (actual as u64) < len => Err(ApiError::Download(format!(
            "archive truncated: got {actual} of {len} bytes"
        ))),
        _ => Ok(()),
    }
}

/// Runs `op` up to `max_attempts` times, sleeping `base * 2^attempt` between
/// attempts while it fails with a retryable error.
pub(crate) fn with_retries<T>(
    max_attempts: u32,
    base: Duration,
    mut op: impl FnMut() -> Result<T, ApiError>,
) -> Result<T, ApiError> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                attempt += 1;
                let backoff = base * (1 << attempt);
                warn!(attempt, backoff_secs = backoff.as_secs(), error = %e, "Retrying...");
                thread::sleep(backoff);
            }
            other => return other,
        }
    }
}

/// Turns an HTTP status plus body into typed `data` or a classified error.
pub(crate) fn decode_envelope<T: DeserializeOwned>(
    status: StatusCode,
    body: &str,
) -> Result<T, ApiError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ApiError::Auth(format!("{status}: {}", body.trim())));
    }

    let envelope: Envelope = match serde_json::from_str(body) {
        Ok(env) => env,
        Err(e) if status.is_success() => {
            return Err(ApiError::InvalidResponse(format!("{e}: {}", body.trim())))
        }
        Err(_) => {
            return Err(ApiError::Service {
                code: status.as_u16().to_string(),
                message: body.trim().to_string(),
            })
        }
    };

    if !is_success_code(&envelope.code) {
        let message = envelope.msg.unwrap_or_else(|| "Unknown error".into());
        let code = code_text(&envelope.code);
        if is_auth_failure(&code, &message) {
            return Err(ApiError::Auth(message));
        }
        return Err(ApiError::Service { code, message });
    }

    if !status.is_success() {
        return Err(ApiError::Service {
            code: status.as_u16().to_string(),
            message: envelope.msg.unwrap_or_else(|| status.to_string()),
        });
    }

    serde_json::from_value(envelope.data)
        .map_err(|e| ApiError::InvalidResponse(format!("unexpected payload: {e}")))
}

fn is_success_code(code: &Value) -> bool {
    match code {
        Value::Number(n) => n.as_i64() == Some(0),
        Value::String(s) => s == "0",
        _ => false,
    }
}

fn code_text(code: &Value) -> String {
    match code {
        Value::String(s) => s.clone(),
        Value::Null => "none".into(),
        other => other.to_string(),
    }
}

// A0202: token error, A0211: token expired.
fn is_auth_failure(code: &str, message: &str) -> bool {
    let msg = message.to_lowercase();
    code == "401"
        || code == "A0202"
        || code == "A0211"
        || msg.contains("token")
        || msg.contains("auth")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn decodes_task_id_from_envelope() {
        let body = r#"{"code":0,"msg":"ok","trace_id":"x","data":{"task_id":"t-42"}}"#;
        let created: TaskCreated = decode_envelope(StatusCode::OK, body).unwrap();
        assert_eq!(created.task_id, "t-42");
    }

    #[test]
    fn decodes_batch_results() {
        let body = r#"{"code":0,"msg":"ok","data":{"batch_id":"b-1","extract_result":[
            {"file_name":"a.pdf","state":"done","full_zip_url":"https://cdn/a.zip","err_msg":""},
            {"file_name":"b.pdf","state":"running","extract_progress":{"extracted_pages":2,"total_pages":9,"start_time":"2026-01-01 10:00:00"}}
        ]}}"#;
        let results: BatchResults = decode_envelope(StatusCode::OK, body).unwrap();
        assert_eq!(results.extract_result.len(), 2);
        assert_eq!(results.extract_result[0].zip_url(), Some("https://cdn/a.zip"));
        assert_eq!(results.extract_result[0].error_message(), "unknown error");
        let progress = results.extract_result[1].extract_progress.as_ref().unwrap();
        assert_eq!((progress.extracted_pages, progress.total_pages), (2, 9));
    }

    #[test]
    fn http_401_is_auth_error() {
        let err = decode_envelope::<TaskCreated>(StatusCode::UNAUTHORIZED, "nope").unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn token_error_codes_are_auth_errors() {
        for body in [
            r#"{"code":"A0202","msg":"Token error"}"#,
            r#"{"code":"A0211","msg":"expired"}"#,
            r#"{"code":401,"msg":"denied"}"#,
        ] {
            let err = decode_envelope::<TaskCreated>(StatusCode::OK, body).unwrap_err();
            assert!(err.is_auth(), "{body} should be an auth error, got {err:?}");
        }
    }

    #[test]
    fn other_codes_are_service_errors() {
        let body = r#"{"code":-60012,"msg":"task not found"}"#;
        match decode_envelope::<TaskCreated>(StatusCode::OK, body).unwrap_err() {
            ApiError::Service { code, message } => {
                assert_eq!(code, "-60012");
                assert_eq!(message, "task not found");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn non_json_error_page_is_service_error() {
        let err = decode_envelope::<TaskCreated>(StatusCode::BAD_GATEWAY, "<html>502</html>")
            .unwrap_err();
        assert!(matches!(err, ApiError::Service { ref code, .. } if code == "502"));
    }

    #[test]
    fn garbage_success_body_is_invalid_response() {
        let err = decode_envelope::<TaskCreated>(StatusCode::OK, "not json").unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }

    #[test]
    fn network_errors_are_retried_until_attempts_run_out() {
        let calls = Cell::new(0);
        let result: Result<(), ApiError> = with_retries(3, Duration::ZERO, || {
            calls.set(calls.get() + 1);
            Err(ApiError::Network("connection reset".into()))
        });
        assert!(matches!(result, Err(ApiError::Network(_))));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn retry_recovers_after_transient_failure() {
        let calls = Cell::new(0);
        let result = with_retries(3, Duration::ZERO, || {
            calls.set(calls.get() + 1);
            if calls.get() < 2 {
                Err(ApiError::Network("timeout".into()))
            } else {
                Ok("task")
            }
        });
        assert_eq!(result.unwrap(), "task");
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn service_and_auth_errors_are_not_retried() {
        let calls = Cell::new(0);
        let _ = with_retries::<()>(3, Duration::ZERO, || {
            calls.set(calls.get() + 1);
            Err(ApiError::Auth("expired".into()))
        });
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn short_body_is_truncated_download() {
        assert!(check_length(Some(100), 100).is_ok());
        assert!(check_length(None, 3).is_ok());
        assert!(matches!(check_length(Some(100), 40), Err(ApiError::Download(_))));
    }

    #[test]
    fn url_request_flattens_options() {
        let options = ParseOptions {
            is_ocr: true,
            ..ParseOptions::default()
        };
        let body = to_body(&UrlTaskRequest {
            url: "https://example.com/a.pdf",
            options: &options,
        })
        .unwrap();
        assert_eq!(body["url"], "https://example.com/a.pdf");
        assert_eq!(body["is_ocr"], true);
        assert_eq!(body["language"], "ch");
    }

    #[test]
    fn upload_request_lists_file_names() {
        let options = ParseOptions::default();
        let body = to_body(&UploadUrlsRequest {
            files: vec![UploadFile { name: "a.pdf" }],
            options: &options,
        })
        .unwrap();
        assert_eq!(body["files"][0]["name"], "a.pdf");
        assert_eq!(body["model_version"], "vlm");
    }
}
