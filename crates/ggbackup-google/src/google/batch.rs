//! Google batch requests (`multipart/mixed`).
//!
//! A batch bundles up to 1000 independent GET requests into one POST. Each
//! part of the request body is an `application/http` message tagged with a
//! `Content-ID`; the response mirrors it with `response-` prefixed ids and
//! embedded HTTP responses. Parts may come back in any order.

use bytes::Bytes;
use futures_util::Stream;
use mime::Mime;
use multer::Multipart;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::BatchItem;
use crate::error::{ApiError, ApiResult};

use super::access::AccessToken;

/// Headers accepted in one embedded HTTP response.
const MAX_PART_HEADERS: usize = 64;

/// Builder for one batched exchange.
#[derive(Debug)]
pub struct BatchRequest {
    id: String,
    boundary: String,
    parts: Vec<(String, String)>,
}

impl BatchRequest {
    pub fn new() -> Self {
        let id = Uuid::new_v4().to_string();
        let boundary = format!("batch_{}", Uuid::new_v4().simple());
        Self {
            id,
            boundary,
            parts: Vec::new(),
        }
    }

    /// Adds a GET sub-request. `path_and_query` is relative to the API host.
    pub fn add(&mut self, request_id: impl Into<String>, path_and_query: impl Into<String>) {
        self.parts.push((request_id.into(), path_and_query.into()));
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Value of the `Content-Type` header for [`body`](Self::body).
    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary={}", self.boundary)
    }

    /// Encodes the multipart request body.
    pub fn body(&self) -> String {
        let mut body = String::new();
        for (index, (_, path)) in self.parts.iter().enumerate() {
            body.push_str(&format!("--{}\r\n", self.boundary));
            body.push_str("Content-Type: application/http\r\n");
            body.push_str("Content-Transfer-Encoding: binary\r\n");
            body.push_str(&format!("Content-ID: <{}+{}>\r\n\r\n", self.id, index + 1));
            body.push_str(&format!("GET {} HTTP/1.1\r\n\r\n", path));
        }
        body.push_str(&format!("--{}--\r\n", self.boundary));
        body
    }

    /// Matches response parts to the sub-requests and decodes their bodies.
    ///
    /// Items come back in request order. A sub-request without a response
    /// part yields an error item.
    pub fn into_items<T: DeserializeOwned>(self, parts: Vec<ResponsePart>) -> Vec<BatchItem<T>> {
        let mut slots: Vec<Option<ResponsePart>> = Vec::new();
        slots.resize_with(self.parts.len(), || None);

        for part in parts {
            match part.index.checked_sub(1).and_then(|i| slots.get_mut(i)) {
                Some(slot) => *slot = Some(part),
                None => warn!("ignoring batch response part with unknown index {}", part.index),
            }
        }

        self.parts
            .into_iter()
            .zip(slots)
            .map(|((request_id, _), part)| {
                let result = match part {
                    Some(part) => part.decode(),
                    None => Err(ApiError::invalid_response(
                        "no response part for sub-request",
                    )),
                };
                BatchItem::new(request_id, result)
            })
            .collect()
    }
}

impl Default for BatchRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// One embedded HTTP response of a batch response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePart {
    /// 1-based index taken from the part's `Content-ID`.
    pub index: usize,
    pub status: u16,
    pub body: String,
}

impl ResponsePart {
    fn decode<T: DeserializeOwned>(self) -> ApiResult<T> {
        if !(200..300).contains(&self.status) {
            return Err(ApiError::from_status(self.status, &self.body));
        }
        serde_json::from_str(&self.body).map_err(|e| {
            ApiError::invalid_response(format!("failed to parse sub-response: {}", e))
        })
    }
}

/// POSTs a batch to `endpoint` and returns the decoded items.
///
/// Fails as a whole on transport errors, a non-success status of the POST
/// itself, or an unparseable multipart body.
pub async fn execute<T: DeserializeOwned>(
    http: &reqwest::Client,
    endpoint: &str,
    token: &AccessToken,
    batch: BatchRequest,
) -> ApiResult<Vec<BatchItem<T>>> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }

    debug!("sending batch of {} sub-requests to {}", batch.len(), endpoint);

    let content_type = batch.content_type();
    let body = batch.body();
    let response = token
        .send(|bearer| {
            http.post(endpoint)
                .bearer_auth(bearer)
                .header(CONTENT_TYPE, &content_type)
                .body(body.clone())
        })
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await?;
        return Err(ApiError::from_status(status.as_u16(), &body));
    }

    let response_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let parts = parse_response(&response_type, response.bytes_stream()).await?;
    Ok(batch.into_items(parts))
}

/// Parses a `multipart/mixed` batch response streamed from `body`.
///
/// Parts without a usable `Content-ID` or embedded HTTP response are skipped
/// with a warning; their sub-requests end up without a response part.
pub async fn parse_response<S, O, E>(content_type: &str, body: S) -> ApiResult<Vec<ResponsePart>>
where
    S: Stream<Item = Result<O, E>> + Send + 'static,
    O: Into<Bytes> + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
    let boundary = boundary_from_content_type(content_type).ok_or_else(|| {
        ApiError::invalid_response(format!(
            "batch response is not multipart: {}",
            content_type
        ))
    })?;

    let mut multipart = Multipart::new(body, boundary);
    let mut parts = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let content_id = field
            .headers()
            .get("content-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let data = field.bytes().await.map_err(malformed)?;

        let Some(index) = content_id.as_deref().and_then(index_from_content_id) else {
            warn!("skipping batch response part without a usable Content-ID: {:?}", content_id);
            continue;
        };
        match parse_embedded(&data) {
            Some((status, body)) => parts.push(ResponsePart { index, status, body }),
            None => warn!("skipping malformed batch response part {}", index),
        }
    }

    Ok(parts)
}

fn malformed(err: multer::Error) -> ApiError {
    ApiError::invalid_response(format!("malformed batch response: {}", err))
}

fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let parsed: Mime = content_type.parse().ok()?;
    if parsed.type_() != mime::MULTIPART {
        return None;
    }
    parsed.get_param(mime::BOUNDARY).map(|b| b.as_str().to_string())
}

/// `<response-{batch}+{n}>` to `n`.
fn index_from_content_id(content_id: &str) -> Option<usize> {
    content_id
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .rsplit_once('+')?
        .1
        .parse()
        .ok()
}

/// Status and body of the HTTP response embedded in one part.
fn parse_embedded(data: &[u8]) -> Option<(u16, String)> {
    // A part with an empty body may end right after its head.
    let padded;
    let data = if data.windows(4).any(|w| w == b"\r\n\r\n") {
        data
    } else {
        padded = [data, &b"\r\n"[..]].concat();
        &padded[..]
    };

    let mut headers = [httparse::EMPTY_HEADER; MAX_PART_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    match response.parse(data) {
        Ok(httparse::Status::Complete(offset)) => {
            let body = String::from_utf8_lossy(&data[offset..]).trim_end().to_string();
            Some((response.code?, body))
        }
        Ok(httparse::Status::Partial) => None,
        Err(e) => {
            debug!("invalid embedded HTTP response: {}", e);
            None
        }
    }
}
