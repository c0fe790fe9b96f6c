//! Response handlers and body decoders.
//!
//! # Design
//! A handler is a trait with one required method, `decode`, and a set of
//! lifecycle callbacks that default to no-ops. For a single task the callbacks
//! arrive strictly ordered:
//!
//! `on_start` → `on_request_headers` → (`on_progress` | `on_retry`)* →
//! exactly one of `on_success` / `on_failure` / `on_cancel` → `on_finish`.
//!
//! Decoding is pluggable through `BodyDecoder`: raw bytes, charset-decoded
//! text, or strictly parsed JSON. `CallbackHandler` pairs any decoder with a
//! set of optional closures for callers who prefer not to define a type.

use std::sync::Arc;

use encoding_rs::Encoding;
use tracing::debug;

use crate::error::ClientError;
use crate::http::Header;

/// A decode error plus whatever could be salvaged from the body.
#[derive(Debug)]
pub struct DecodeFailure<T> {
    pub error: ClientError,
    pub partial: Option<T>,
}

impl<T> DecodeFailure<T> {
    pub fn new(error: ClientError, partial: Option<T>) -> Self {
        Self { error, partial }
    }
}

/// Turns a raw response body into a handler's body type.
pub trait BodyDecoder: Send + Sync + 'static {
    type Output: Send + 'static;

    fn decode(&self, raw: &[u8]) -> Result<Self::Output, DecodeFailure<Self::Output>>;
}

/// Receives lifecycle events for one request.
pub trait ResponseHandler: Send + Sync + 'static {
    type Body: Send + 'static;

    /// Decode the raw body. Called for every response, successful or not.
    fn decode(&self, raw: &[u8]) -> Result<Self::Body, DecodeFailure<Self::Body>>;

    /// Whether `status` counts as success. Defaults to 2xx.
    fn is_success(&self, status: u16) -> bool {
        (200..300).contains(&status)
    }

    /// The final request headers, delivered right after `on_start`.
    fn on_request_headers(&self, _headers: &[Header]) {}

    fn on_start(&self) {}

    fn on_success(&self, _status: u16, _headers: &[Header], _body: Self::Body) {}

    /// `status` is 0 when no response was received.
    fn on_failure(
        &self,
        status: u16,
        _headers: &[Header],
        _body: Option<Self::Body>,
        cause: &ClientError,
    ) {
        debug!(status, %cause, "on_failure not overridden; failure dropped");
    }

    fn on_retry(&self, _attempt: u32) {}

    /// `total` is `None` when the length was not declared.
    fn on_progress(&self, _transferred: u64, _total: Option<u64>) {}

    fn on_finish(&self) {}

    fn on_cancel(&self) {}
}

impl<H: ResponseHandler> ResponseHandler for Arc<H> {
    type Body = H::Body;

    fn decode(&self, raw: &[u8]) -> Result<Self::Body, DecodeFailure<Self::Body>> {
        (**self).decode(raw)
    }

    fn is_success(&self, status: u16) -> bool {
        (**self).is_success(status)
    }

    fn on_request_headers(&self, headers: &[Header]) {
        (**self).on_request_headers(headers)
    }

    fn on_start(&self) {
        (**self).on_start()
    }

    fn on_success(&self, status: u16, headers: &[Header], body: Self::Body) {
        (**self).on_success(status, headers, body)
    }

    fn on_failure(
        &self,
        status: u16,
        headers: &[Header],
        body: Option<Self::Body>,
        cause: &ClientError,
    ) {
        (**self).on_failure(status, headers, body, cause)
    }

    fn on_retry(&self, attempt: u32) {
        (**self).on_retry(attempt)
    }

    fn on_progress(&self, transferred: u64, total: Option<u64>) {
        (**self).on_progress(transferred, total)
    }

    fn on_finish(&self) {
        (**self).on_finish()
    }

    fn on_cancel(&self) {
        (**self).on_cancel()
    }
}

/// A handler that ignores the response entirely.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardHandler;

impl ResponseHandler for DiscardHandler {
    type Body = ();

    fn decode(&self, _raw: &[u8]) -> Result<(), DecodeFailure<()>> {
        Ok(())
    }

    fn on_failure(&self, _status: u16, _headers: &[Header], _body: Option<()>, _cause: &ClientError) {}
}

/// Returns the body unmodified.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesDecoder;

impl BodyDecoder for BytesDecoder {
    type Output = Vec<u8>;

    fn decode(&self, raw: &[u8]) -> Result<Vec<u8>, DecodeFailure<Vec<u8>>> {
        Ok(raw.to_vec())
    }
}

/// Decodes text in a declared charset. A leading byte-order mark selects its
/// own encoding and is removed; malformed sequences become U+FFFD.
#[derive(Debug, Clone, Copy)]
pub struct TextDecoder {
    encoding: &'static Encoding,
}

impl TextDecoder {
    pub fn new(label: &str) -> Result<Self, ClientError> {
        let encoding = Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| ClientError::UnsupportedEncoding(label.to_string()))?;
        Ok(Self { encoding })
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn decode_str(&self, raw: &[u8]) -> String {
        let (text, _, _) = self.encoding.decode(raw);
        text.into_owned()
    }
}

impl Default for TextDecoder {
    fn default() -> Self {
        Self {
            encoding: encoding_rs::UTF_8,
        }
    }
}

impl BodyDecoder for TextDecoder {
    type Output = String;

    fn decode(&self, raw: &[u8]) -> Result<String, DecodeFailure<String>> {
        Ok(self.decode_str(raw))
    }
}

const BYTE_ORDER_MARK: char = '\u{FEFF}';

/// Strictly parses JSON objects and arrays.
///
/// The text is trimmed and any byte-order mark removed. It must then start
/// with `{` or `[`; anything else fails with the trimmed text as a string
/// fallback, so an empty body is a failure too.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder {
    text: TextDecoder,
}

impl JsonDecoder {
    pub fn new(label: &str) -> Result<Self, ClientError> {
        Ok(Self {
            text: TextDecoder::new(label)?,
        })
    }
}

impl BodyDecoder for JsonDecoder {
    type Output = serde_json::Value;

    fn decode(&self, raw: &[u8]) -> Result<serde_json::Value, DecodeFailure<serde_json::Value>> {
        let text = self.text.decode_str(raw);
        let trimmed = text.trim().trim_start_matches(BYTE_ORDER_MARK).trim_start();
        let fallback = || Some(serde_json::Value::String(trimmed.to_string()));
        if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
            return Err(DecodeFailure::new(
                ClientError::Decode("response cannot be parsed as JSON data".to_string()),
                fallback(),
            ));
        }
        serde_json::from_str(trimmed)
            .map_err(|e| DecodeFailure::new(ClientError::Decode(e.to_string()), fallback()))
    }
}

type StartFn = Box<dyn Fn() + Send + Sync>;
type SuccessFn<T> = Box<dyn Fn(u16, &[Header], T) + Send + Sync>;
type FailureFn<T> = Box<dyn Fn(u16, &[Header], Option<T>, &ClientError) + Send + Sync>;
type RetryFn = Box<dyn Fn(u32) + Send + Sync>;
type ProgressFn = Box<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// A handler assembled from a decoder and optional closures.
pub struct CallbackHandler<D: BodyDecoder> {
    decoder: D,
    start: Option<StartFn>,
    success: Option<SuccessFn<D::Output>>,
    failure: Option<FailureFn<D::Output>>,
    retry: Option<RetryFn>,
    progress: Option<ProgressFn>,
    finish: Option<StartFn>,
    cancel: Option<StartFn>,
}

impl CallbackHandler<BytesDecoder> {
    pub fn bytes() -> Self {
        Self::new(BytesDecoder)
    }
}

impl CallbackHandler<TextDecoder> {
    pub fn text() -> Self {
        Self::new(TextDecoder::default())
    }
}

impl CallbackHandler<JsonDecoder> {
    pub fn json() -> Self {
        Self::new(JsonDecoder::default())
    }
}

impl<D: BodyDecoder> CallbackHandler<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            decoder,
            start: None,
            success: None,
            failure: None,
            retry: None,
            progress: None,
            finish: None,
            cancel: None,
        }
    }

    pub fn with_start(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.start = Some(Box::new(f));
        self
    }

    pub fn with_success(mut self, f: impl Fn(u16, &[Header], D::Output) + Send + Sync + 'static) -> Self {
        self.success = Some(Box::new(f));
        self
    }

    pub fn with_failure(
        mut self,
        f: impl Fn(u16, &[Header], Option<D::Output>, &ClientError) + Send + Sync + 'static,
    ) -> Self {
        self.failure = Some(Box::new(f));
        self
    }

    pub fn with_retry(mut self, f: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.retry = Some(Box::new(f));
        self
    }

    pub fn with_progress(mut self, f: impl Fn(u64, Option<u64>) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    pub fn with_finish(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.finish = Some(Box::new(f));
        self
    }

    pub fn with_cancel(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.cancel = Some(Box::new(f));
        self
    }
}

impl<D: BodyDecoder> ResponseHandler for CallbackHandler<D> {
    type Body = D::Output;

    fn decode(&self, raw: &[u8]) -> Result<Self::Body, DecodeFailure<Self::Body>> {
        self.decoder.decode(raw)
    }

    fn on_start(&self) {
        if let Some(f) = &self.start {
            f();
        }
    }

    fn on_success(&self, status: u16, headers: &[Header], body: Self::Body) {
        if let Some(f) = &self.success {
            f(status, headers, body);
        }
    }

    fn on_failure(
        &self,
        status: u16,
        headers: &[Header],
        body: Option<Self::Body>,
        cause: &ClientError,
    ) {
        match &self.failure {
            Some(f) => f(status, headers, body, cause),
            None => debug!(status, %cause, "no failure callback registered"),
        }
    }

    fn on_retry(&self, attempt: u32) {
        if let Some(f) = &self.retry {
            f(attempt);
        }
    }

    fn on_progress(&self, transferred: u64, total: Option<u64>) {
        if let Some(f) = &self.progress {
            f(transferred, total);
        }
    }

    fn on_finish(&self) {
        if let Some(f) = &self.finish {
            f();
        }
    }

    fn on_cancel(&self) {
        if let Some(f) = &self.cancel {
            f();
        }
    }
}
