//! The request model seen by the matcher and the template engine.

use crate::error::RequestError;
use bytes::Bytes;
use hyper::http::request::Parts;
use hyper::Method;
use std::collections::HashMap;

/// One parsed HTTP request, owned by the task handling it.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub method: Method,
    pub path: String,
    /// Raw query string, without the leading `?`
    pub query: Option<String>,
    /// Header values keyed by lower-case name; repeated headers keep the first value
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl IncomingRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Build from the head of a hyper request and its collected body.
    pub fn from_parts(parts: &Parts, body: Bytes) -> Result<Self, RequestError> {
        let mut headers = HashMap::new();
        for (name, value) in &parts.headers {
            let value = value
                .to_str()
                .map_err(|_| RequestError::InvalidHeader(name.as_str().to_string()))?;
            headers
                .entry(name.as_str().to_string())
                .or_insert_with(|| value.to_string());
        }

        let path = urlencoding_decode(parts.uri.path()).ok_or(RequestError::InvalidPath)?;

        Ok(Self {
            method: parts.method.clone(),
            path,
            query: parts.uri.query().map(String::from),
            headers,
            body,
        })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Body as text, if it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Decoded query parameters; a repeated key keeps its last value.
    pub fn query_params(&self) -> HashMap<String, String> {
        parse_query_string(self.query.as_deref().unwrap_or(""))
    }

    /// Decoded path plus the raw query string.
    pub fn url(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }
}

/// Parse a query string into key-value pairs.
pub(crate) fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        let key = urlencoding_decode(&key.replace('+', " "));
        let value = urlencoding_decode(&value.replace('+', " "));
        if let (Some(key), Some(value)) = (key, value) {
            params.insert(key, value);
        }
    }

    params
}

/// Percent-decoding; `None` when the decoded bytes are not UTF-8.
fn urlencoding_decode(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                decoded.push(byte);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }

    String::from_utf8(decoded).ok()
}
