use std::io::Read;

use rangecache_http_range::parse_content_range;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, CONTENT_LENGTH, CONTENT_RANGE,
    CONTENT_TYPE, RANGE,
};
use url::Url;

use crate::config::redact_url_for_logs;
use crate::error::{Result, StreamError};

/// A response whose body is consumed incrementally.
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// Declared `Content-Length`, read from the header rather than the body size hint (the latter
    /// is zero for `HEAD`).
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

impl HttpResponse {
    pub fn header_str(&self, name: HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header_str(CONTENT_TYPE)
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Blocking HTTP seam used by [`crate::RemoteStream`].
///
/// Only two verbs are needed: `HEAD` for the size probe and `GET` (with `Range`) for data.
pub trait HttpTransport: Send {
    fn head(&self, url: &Url, headers: &HeaderMap) -> Result<HttpResponse>;
    fn get(&self, url: &Url, headers: &HeaderMap) -> Result<HttpResponse>;
}

impl<T: HttpTransport + Sync + ?Sized> HttpTransport for std::sync::Arc<T> {
    fn head(&self, url: &Url, headers: &HeaderMap) -> Result<HttpResponse> {
        (**self).head(url, headers)
    }

    fn get(&self, url: &Url, headers: &HeaderMap) -> Result<HttpResponse> {
        (**self).get(url, headers)
    }
}

/// [`HttpTransport`] backed by `reqwest::blocking`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        // Media bodies can take arbitrarily long to drain, so no total timeout.
        let client = reqwest::blocking::Client::builder()
            .timeout(None)
            .build()
            .map_err(|e| StreamError::Http(format_reqwest_error(e)))?;
        Ok(Self { client })
    }

    fn convert(resp: reqwest::blocking::Response) -> HttpResponse {
        let headers = resp.headers().clone();
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        HttpResponse {
            status: resp.status().as_u16(),
            headers,
            content_length,
            body: Box::new(resp),
        }
    }
}

impl HttpTransport for ReqwestTransport {
    fn head(&self, url: &Url, headers: &HeaderMap) -> Result<HttpResponse> {
        let resp = self
            .client
            .head(url.clone())
            .headers(headers.clone())
            .send()
            .map_err(|e| StreamError::Http(format_reqwest_error(e)))?;
        Ok(Self::convert(resp))
    }

    fn get(&self, url: &Url, headers: &HeaderMap) -> Result<HttpResponse> {
        let resp = self
            .client
            .get(url.clone())
            .headers(headers.clone())
            .send()
            .map_err(|e| StreamError::Http(format_reqwest_error(e)))?;
        Ok(Self::convert(resp))
    }
}

/// What the size probe learned about the resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RemoteProbe {
    pub size: u64,
    pub content_type: Option<String>,
}

/// Determine the resource size.
///
/// `HEAD` answered with `200` and a `Content-Length` is authoritative. Servers that reject `HEAD`
/// or omit the length get a `GET Range: bytes=0-0` whose `Content-Range` total is used instead.
pub(crate) fn probe_remote_size<T: HttpTransport + ?Sized>(
    transport: &T,
    url: &Url,
    request_headers: &HeaderMap,
) -> Result<RemoteProbe> {
    let mut head_content_type = None;
    match transport.head(url, request_headers) {
        Ok(resp) if resp.status == 200 => {
            head_content_type = resp.content_type().map(str::to_string);
            if let Some(size) = resp.content_length {
                return Ok(RemoteProbe {
                    size,
                    content_type: head_content_type,
                });
            }
        }
        Ok(resp) => {
            tracing::debug!(status = resp.status, "HEAD probe rejected; falling back to GET");
        }
        Err(err) => {
            tracing::debug!(error = %err, "HEAD probe failed; falling back to GET");
        }
    }

    let mut headers = request_headers.clone();
    headers.insert(RANGE, HeaderValue::from_static("bytes=0-0"));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    let resp = transport.get(url, &headers)?;

    match resp.status {
        206 => {}
        200 => return Err(StreamError::RangeNotSupported),
        status => return Err(StreamError::HttpStatus { status }),
    }

    let content_range = resp
        .header_str(CONTENT_RANGE)
        .ok_or_else(|| StreamError::Protocol("missing Content-Range".to_string()))?;
    let size = parse_content_range(content_range)?
        .total
        .ok_or(StreamError::MissingContentLength)?;

    Ok(RemoteProbe {
        size,
        content_type: resp.content_type().map(str::to_string).or(head_content_type),
    })
}

pub(crate) fn build_header_map(headers: &[(String, String)]) -> Result<HeaderMap> {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        let name_lower = name.to_ascii_lowercase();
        let name = HeaderName::from_bytes(name_lower.as_bytes())
            .map_err(|e| StreamError::Protocol(e.to_string()))?;
        let value =
            HeaderValue::from_str(value).map_err(|e| StreamError::Protocol(e.to_string()))?;
        out.append(name, value);
    }
    Ok(out)
}

fn format_reqwest_error(err: reqwest::Error) -> String {
    let mut msg = err.to_string();
    if let Some(url) = err.url() {
        let redacted = redact_url_for_logs(url);
        msg = msg.replace(url.as_str(), redacted.as_str());
    }
    msg
}
