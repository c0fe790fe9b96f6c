//! The seam between the core and the HTTP transport collaborator.
//!
//! # Design
//! The core never speaks HTTP itself. A `Transport` receives a fully built
//! `HttpRequest` and returns an `HttpResponse` or an error. Connection
//! pooling, TLS, redirects, compression, timeouts and retry policy all belong
//! to the transport. While it runs, the transport reports back through a
//! `TransferObserver`: progress, retries, and (for interruptible transports) a
//! cancellation probe it may poll between chunks.

use crate::error::ClientError;
use crate::http::{HttpRequest, HttpResponse};

/// Callbacks a transport may invoke while a request is in flight.
pub trait TransferObserver: Send + Sync {
    /// Bytes moved so far and the declared total, if known.
    fn on_progress(&self, _transferred: u64, _total: Option<u64>) {}

    /// The transport is about to retry; `attempt` starts at 1.
    fn on_retry(&self, _attempt: u32) {}

    /// Whether the caller asked for an interrupting cancel.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// An observer that ignores every event.
pub struct NoopObserver;

impl TransferObserver for NoopObserver {}

/// Executes built requests. Implementations must be shareable across worker
/// threads.
pub trait Transport: Send + Sync {
    fn execute(
        &self,
        request: &HttpRequest,
        observer: &dyn TransferObserver,
    ) -> Result<HttpResponse, ClientError>;

    /// Drop idle pooled connections. Called by `cancel_all_requests`.
    fn close_expired_connections(&self) {}
}

/// A transport backed by a plain function, for stubs and adapters.
pub struct FnTransport<F>(F);

/// Wrap `f` as a `Transport`.
pub fn from_fn<F>(f: F) -> FnTransport<F>
where
    F: Fn(&HttpRequest) -> Result<HttpResponse, ClientError> + Send + Sync,
{
    FnTransport(f)
}

impl<F> Transport for FnTransport<F>
where
    F: Fn(&HttpRequest) -> Result<HttpResponse, ClientError> + Send + Sync,
{
    fn execute(
        &self,
        request: &HttpRequest,
        _observer: &dyn TransferObserver,
    ) -> Result<HttpResponse, ClientError> {
        (self.0)(request)
    }
}

#[cfg(feature = "ureq")]
pub use self::ureq_transport::UreqTransport;

#[cfg(feature = "ureq")]
mod ureq_transport {
    use std::io::Read;
    use std::time::Duration;

    use parking_lot::RwLock;
    use ureq::http;

    use super::{TransferObserver, Transport};
    use crate::config::ClientOptions;
    use crate::error::{ClientError, TransportError};
    use crate::http::{HttpRequest, HttpResponse};

    const READ_CHUNK: usize = 8 * 1024;

    /// A blocking transport built on a `ureq::Agent`.
    ///
    /// Non-2xx statuses come back as responses, not errors, so status
    /// classification stays with the response handler.
    pub struct UreqTransport {
        agent: RwLock<ureq::Agent>,
        options: ClientOptions,
    }

    impl UreqTransport {
        pub fn new(options: &ClientOptions) -> Self {
            Self {
                agent: RwLock::new(build_agent(options)),
                options: options.clone(),
            }
        }
    }

    impl Default for UreqTransport {
        fn default() -> Self {
            Self::new(&ClientOptions::default())
        }
    }

    fn build_agent(options: &ClientOptions) -> ureq::Agent {
        let max_redirects = if options.follow_redirects {
            options.max_redirects
        } else {
            0
        };
        ureq::Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(max_redirects)
            .timeout_global(options.timeout_ms.map(Duration::from_millis))
            .build()
            .new_agent()
    }

    fn transport_error(err: ureq::Error) -> ClientError {
        match err {
            ureq::Error::Timeout(_) => TransportError::timeout(err.to_string()).into(),
            other => TransportError::new(other.to_string()).into(),
        }
    }

    impl Transport for UreqTransport {
        fn execute(
            &self,
            request: &HttpRequest,
            observer: &dyn TransferObserver,
        ) -> Result<HttpResponse, ClientError> {
            let mut builder = http::Request::builder()
                .method(request.method.as_str())
                .uri(request.url.as_str());
            for (name, value) in request.effective_headers() {
                builder = builder.header(name, value);
            }

            let agent = self.agent.read().clone();
            let result = match &request.body {
                Some(entity) => {
                    let mut body = Vec::new();
                    entity.write_to(&mut body, observer)?;
                    let request = builder
                        .body(body)
                        .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
                    agent.run(request)
                }
                None => {
                    let request = builder
                        .body(())
                        .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
                    agent.run(request)
                }
            };
            let mut response = result.map_err(transport_error)?;

            let status = response.status().as_u16();
            let headers: Vec<(String, String)> = response
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_string(),
                        String::from_utf8_lossy(v.as_bytes()).into_owned(),
                    )
                })
                .collect();
            let total = headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, v)| v.trim().parse::<u64>().ok());

            let mut reader = response.body_mut().as_reader();
            let mut body = Vec::with_capacity(total.unwrap_or(0).min(1 << 20) as usize);
            let mut chunk = vec![0u8; READ_CHUNK];
            loop {
                if observer.is_cancelled() {
                    return Err(TransportError::new("interrupted by cancellation").into());
                }
                let n = reader
                    .read(&mut chunk)
                    .map_err(|e| TransportError::new(e.to_string()))?;
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&chunk[..n]);
                observer.on_progress(body.len() as u64, total);
            }

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        }

        /// ureq exposes no pool purge, so the agent (and its idle
        /// connections) is replaced by a fresh one.
        fn close_expired_connections(&self) {
            *self.agent.write() = build_agent(&self.options);
        }
    }
}
