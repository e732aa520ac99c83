//! The pluggable transport that performs the network call and decodes payloads.
//!
//! [`ReqwestTransport`] is the reference implementation. Custom transports (test
//! doubles, other HTTP stacks) implement [`Transport`] and are installed with
//! [`AdapterOptions::transport`](crate::AdapterOptions::transport).

use crate::abort::AbortSignal;
use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde_json::{Map, Value};
use url::Url;

/// What the pipeline hands to [`Transport::send_request`].
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Fully built URL, including search parameters.
    pub url: Url,
    /// Request body, already selected for body-bearing methods.
    pub body: Option<Value>,
    /// The merged transport options.
    pub options: Option<Value>,
    /// The merged request headers.
    pub headers: HeaderMap,
    /// Fires on timeout or external abort.
    pub abort_signal: Option<AbortSignal>,
}

/// A fully buffered transport response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// The final URL, after redirects.
    pub url: String,
    /// HTTP status.
    pub status: StatusCode,
    /// Status text, e.g. `Not Found`.
    pub status_text: String,
    /// Response headers.
    pub headers: HeaderMap,
    /// Raw body bytes.
    pub body: Bytes,
}

impl RawResponse {
    /// Creates an empty response with the canonical status text.
    pub fn new(status: StatusCode) -> Self {
        Self {
            url: String::new(),
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Sets the response URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Adds a response header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.headers.append(name, value);
        }
        self
    }

    /// Sets the raw body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets a JSON body and the matching content type.
    pub fn with_json(self, body: &Value) -> Self {
        self.with_header("content-type", "application/json")
            .with_body(body.to_string())
    }

    /// The body as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Returns a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The lowercased media type of the `Content-Type` header, without parameters.
    pub fn content_type(&self) -> Option<String> {
        self.header(CONTENT_TYPE.as_str()).map(media_type)
    }
}

/// The transport contract.
///
/// `send_request` performs the call and returns the raw response with its status
/// and status text. It must stop as soon as the request's abort signal fires and
/// report the signal's reason as [`TransportError::Aborted`].
///
/// # Examples
///
/// ```
/// use adapterkit::{RawResponse, Transport, TransportError, TransportRequest};
/// use async_trait::async_trait;
/// use http::StatusCode;
///
/// struct AlwaysOk;
///
/// #[async_trait]
/// impl Transport for AlwaysOk {
///     async fn send_request(
///         &self,
///         request: TransportRequest,
///     ) -> Result<(RawResponse, StatusCode, String), TransportError> {
///         let response = RawResponse::new(StatusCode::OK)
///             .with_url(request.url.as_str())
///             .with_json(&serde_json::json!({ "ok": true }));
///         Ok((response, StatusCode::OK, "OK".to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the request.
    async fn send_request(
        &self,
        request: TransportRequest,
    ) -> Result<(RawResponse, StatusCode, String), TransportError>;

    /// Decodes the response payload. Defaults to [`decode_payload`].
    async fn extract_payload(
        &self,
        response: &RawResponse,
        options: Option<&Value>,
    ) -> Result<Value, TransportError> {
        decode_payload(response, options)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadKind {
    Json,
    Text,
    Binary,
    Form,
    Multipart,
    Empty,
}

/// Decodes a response body into a JSON value.
///
/// The transport option `responseType` (`json`, `text`, `bytes`, `blob`,
/// `arrayBuffer`, `formData` or `none`) selects the decoding; without it the
/// `Content-Type` header is sniffed. Binary payloads become an array of byte
/// values, url-encoded forms an object of strings, multipart bodies their raw
/// text. Unknown content types decode to `null`, as does an empty JSON body.
///
/// # Errors
///
/// Returns [`TransportError::Decode`] when a JSON body is malformed.
pub fn decode_payload(response: &RawResponse, options: Option<&Value>) -> Result<Value, TransportError> {
    let content_type = response.content_type();
    let hint = options
        .and_then(|o| o.get("responseType"))
        .and_then(Value::as_str);

    let kind = match hint {
        Some("json") => PayloadKind::Json,
        Some("text") => PayloadKind::Text,
        Some("bytes" | "blob" | "arrayBuffer") => PayloadKind::Binary,
        Some("formData") => match content_type.as_deref() {
            Some("application/x-www-form-urlencoded") => PayloadKind::Form,
            _ => PayloadKind::Multipart,
        },
        Some("none") => PayloadKind::Empty,
        _ => sniff(content_type.as_deref()),
    };

    let value = match kind {
        PayloadKind::Json => {
            if response.body.iter().all(u8::is_ascii_whitespace) {
                Value::Null
            } else {
                serde_json::from_slice(&response.body)
                    .map_err(|e| TransportError::Decode(e.to_string()))?
            }
        }
        PayloadKind::Text | PayloadKind::Multipart => Value::String(response.text()),
        PayloadKind::Binary => Value::Array(response.body.iter().map(|b| Value::from(*b)).collect()),
        PayloadKind::Form => {
            let fields: Map<String, Value> = url::form_urlencoded::parse(&response.body)
                .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
                .collect();
            Value::Object(fields)
        }
        PayloadKind::Empty => Value::Null,
    };
    Ok(value)
}

fn sniff(content_type: Option<&str>) -> PayloadKind {
    match content_type {
        Some(ct) if ct == "application/json" || ct.ends_with("+json") => PayloadKind::Json,
        Some(ct) if ct.starts_with("text/") => PayloadKind::Text,
        Some("application/octet-stream") => PayloadKind::Binary,
        Some("application/x-www-form-urlencoded") => PayloadKind::Form,
        Some("multipart/form-data") => PayloadKind::Multipart,
        _ => PayloadKind::Empty,
    }
}

fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// The reference transport, built on `reqwest`.
///
/// Request bodies are encoded according to the request's `Content-Type`:
/// url-encoded forms and multipart forms from a JSON object, raw bytes for
/// `application/octet-stream`, verbatim strings for `text/*`, JSON otherwise.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with a default `reqwest` client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client })
    }

    /// Wraps an existing `reqwest` client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send_request(
        &self,
        request: TransportRequest,
    ) -> Result<(RawResponse, StatusCode, String), TransportError> {
        let TransportRequest {
            method,
            url,
            body,
            mut headers,
            abort_signal,
            ..
        } = request;

        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(media_type);

        let mut builder = self.client.request(method, url);
        match body {
            Some(body) => {
                if content_type.as_deref() == Some("multipart/form-data") {
                    // reqwest adds the header with the boundary
                    headers.remove(CONTENT_TYPE);
                }
                builder = encode_body(builder.headers(headers), content_type.as_deref(), body)?;
            }
            None => builder = builder.headers(headers),
        }

        let exchange = async move {
            let response = builder.send().await?;
            let url = response.url().to_string();
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            Ok::<_, TransportError>(RawResponse {
                url,
                status,
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                headers,
                body,
            })
        };

        let response = match abort_signal {
            Some(signal) => tokio::select! {
                response = exchange => response?,
                reason = signal.aborted() => return Err(TransportError::Aborted(Box::new(reason))),
            },
            None => exchange.await?,
        };

        let status = response.status;
        let status_text = response.status_text.clone();
        Ok((response, status, status_text))
    }
}

fn encode_body(
    builder: reqwest::RequestBuilder,
    content_type: Option<&str>,
    body: Value,
) -> Result<reqwest::RequestBuilder, TransportError> {
    let builder = match content_type {
        Some("application/x-www-form-urlencoded") => {
            let fields = as_object(body, "a form body must be an object")?;
            let mut form = url::form_urlencoded::Serializer::new(String::new());
            for (key, value) in &fields {
                form.append_pair(key, &field_text(value));
            }
            builder.body(form.finish())
        }
        Some("multipart/form-data") => {
            let fields = as_object(body, "a multipart body must be an object")?;
            let form = fields
                .into_iter()
                .fold(reqwest::multipart::Form::new(), |form, (key, value)| {
                    form.text(key, field_text(&value))
                });
            builder.multipart(form)
        }
        Some("application/octet-stream") => builder.body(binary_body(body)?),
        Some(ct) if ct.starts_with("text/") => builder.body(field_text(&body)),
        _ => builder.json(&body),
    };
    Ok(builder)
}

fn as_object(body: Value, message: &str) -> Result<Map<String, Value>, TransportError> {
    match body {
        Value::Object(fields) => Ok(fields),
        _ => Err(TransportError::InvalidBody(message.to_string())),
    }
}

fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn binary_body(body: Value) -> Result<Vec<u8>, TransportError> {
    match body {
        Value::String(s) => Ok(s.into_bytes()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| TransportError::InvalidBody(format!("not a byte value: {item}")))
            })
            .collect(),
        other => Err(TransportError::InvalidBody(format!(
            "a binary body must be a string or an array of bytes, got {other}"
        ))),
    }
}
