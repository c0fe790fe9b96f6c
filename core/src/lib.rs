//! Asynchronous HTTP request client core.
//!
//! # Overview
//! Callers collect request parameters in a thread-safe `RequestParams`
//! container (plain strings, files, single-use streams, and nested structured
//! values), and the client turns them into a query string or a request body.
//! Requests run as tasks on a worker pool and report back through a
//! `ResponseHandler`. The HTTP exchange itself is delegated to a `Transport`.
//!
//! # Design
//! - Structured values are an explicit sum type (`Value`), flattened into
//!   bracket-keyed pairs (`user[name]`, `langs[0]`) by a pure function.
//! - Body selection is a fixed policy: JSON when requested, URL-encoded when
//!   there are no binary parts, multipart otherwise.
//! - Every task reaches exactly one terminal callback followed by
//!   `on_finish`, including when the transport panics or the caller cancels.
//! - Build-time errors surface synchronously and no task is dispatched.
//! - The worker pool belongs to the client; there is no global executor.
//!
//! ```no_run
//! use async_http_core::{AsyncHttpClient, CallbackHandler, ClientOptions, RequestParams};
//!
//! let client = AsyncHttpClient::with_ureq(ClientOptions::default());
//! let params = RequestParams::from_pairs([("q", "rust")]);
//! let handler = CallbackHandler::json()
//!     .with_success(|status, _headers, body| println!("{status}: {body}"));
//! let handle = client.get("http://localhost:3000/echo", &[], Some(&params), handler)?;
//! handle.cancel(false);
//! # Ok::<(), async_http_core::ClientError>(())
//! ```

pub mod client;
pub mod config;
pub mod entity;
pub mod error;
pub mod flatten;
pub mod handler;
pub mod http;
pub mod params;
pub mod pool;
pub mod task;
pub mod transport;
pub mod value;

pub use client::AsyncHttpClient;
pub use config::ClientOptions;
pub use entity::{Entity, EntityKind};
pub use error::{ClientError, TransportError};
pub use flatten::{flatten, flatten_all};
pub use handler::{
    BodyDecoder, BytesDecoder, CallbackHandler, DecodeFailure, DiscardHandler, JsonDecoder,
    ResponseHandler, TextDecoder,
};
pub use http::{Header, HttpMethod, HttpRequest, HttpResponse};
pub use params::{RequestParams, StreamParam};
pub use pool::{Executor, InlineExecutor, ThreadPool};
pub use task::{RequestHandle, RequestTask, TaskStatus};
pub use transport::{TransferObserver, Transport};
#[cfg(feature = "ureq")]
pub use transport::UreqTransport;
pub use value::Value;
