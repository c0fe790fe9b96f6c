//! HTTP request and response types exchanged with the transport.
//!
//! # Design
//! These types describe requests and responses as plain data. The core builds
//! an `HttpRequest` (method, final URL, headers, optional body entity) and the
//! transport collaborator turns it into network traffic, handing back an
//! `HttpResponse`. Header lists are ordered `(name, value)` pairs so repeated
//! headers survive the round-trip.

use std::fmt;

use url::Url;

use crate::entity::Entity;
use crate::error::ClientError;
use crate::params::RequestParams;

/// A single header as a `(name, value)` pair.
pub type Header = (String, String);

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Trace,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
        }
    }

    /// Whether request parameters travel as a body entity for this method.
    /// All other methods append them to the query string.
    pub fn encloses_entity(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An HTTP request described as plain data.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<Header>,
    pub body: Option<Entity>,
}

impl HttpRequest {
    /// Headers the transport should send, with the entity's content type
    /// appended when the caller did not set one.
    pub fn effective_headers(&self) -> Vec<Header> {
        let mut headers = self.headers.clone();
        if let Some(entity) = &self.body {
            let has_content_type = headers
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
            if !has_content_type {
                headers.push(("Content-Type".to_string(), entity.content_type().to_string()));
            }
        }
        headers
    }
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// First header value matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Append the container's query string to `url` and validate the result.
///
/// With URL encoding enabled the parameters are form-encoded and literal
/// spaces left in the caller's URL become `%20`. With it disabled the
/// parameters are appended raw and only the `%20` substitution is applied.
pub fn url_with_query_string(
    url: &str,
    params: Option<&RequestParams>,
    url_encoding_enabled: bool,
) -> Result<String, ClientError> {
    let mut full = url.to_string();
    if let Some(params) = params {
        let query = if url_encoding_enabled {
            params.param_string()?
        } else {
            params.raw_param_string()
        };
        let query = query.trim();
        if !query.is_empty() && query != "?" {
            full.push(if full.contains('?') { '&' } else { '?' });
            full.push_str(query);
        }
    }
    let full = full.replace(' ', "%20");
    Url::parse(&full).map_err(|e| ClientError::InvalidUrl(format!("{full}: {e}")))?;
    Ok(full)
}
