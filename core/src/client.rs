//! The dispatching client.
//!
//! # Design
//! `AsyncHttpClient` turns a method, URL, headers and parameters into an
//! `HttpRequest` (`build_request`), wraps it in a `RequestTask`, fires the
//! handler's pre-dispatch callbacks on the caller's thread, and hands the task
//! to its executor. In synchronous mode the task runs inline instead.
//!
//! Anything that can go wrong while building (a malformed URL, an unknown
//! charset, an exhausted stream) is returned to the caller directly and no
//! task is created. Everything after dispatch reaches the handler.
//!
//! The executor is owned by the client and replaceable at runtime. There is
//! no process-wide default pool.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::config::ClientOptions;
use crate::entity::{self, Entity};
use crate::error::ClientError;
use crate::handler::ResponseHandler;
use crate::http::{url_with_query_string, Header, HttpMethod, HttpRequest};
use crate::params::RequestParams;
use crate::pool::{Executor, InlineExecutor, ThreadPool};
use crate::task::{RequestHandle, RequestTask};
use crate::transport::Transport;

/// Verb helpers that take a parameter container. Bodiless verbs get a query
/// string; POST, PUT and PATCH get an entity.
macro_rules! with_params {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            pub fn $name<H: ResponseHandler>(
                &self,
                url: &str,
                headers: &[Header],
                params: Option<&RequestParams>,
                handler: H,
            ) -> Result<RequestHandle, ClientError> {
                self.request(HttpMethod::$method, url, headers, params, handler)
            }
        )*
    };
}

/// Verb helpers that send a pre-built entity.
macro_rules! with_entity {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            pub fn $name<H: ResponseHandler>(
                &self,
                url: &str,
                headers: &[Header],
                entity: Entity,
                handler: H,
            ) -> Result<RequestHandle, ClientError> {
                self.dispatch(HttpMethod::$method, url, headers, Some(entity), handler)
            }
        )*
    };
}

/// Builds requests and runs them on a worker pool.
pub struct AsyncHttpClient {
    options: ClientOptions,
    transport: Arc<dyn Transport>,
    executor: RwLock<Arc<dyn Executor>>,
    default_headers: RwLock<Vec<Header>>,
}

impl AsyncHttpClient {
    /// A client using the given transport. The executor is a cached
    /// `ThreadPool` sized from `options`, or an `InlineExecutor` in
    /// synchronous mode.
    pub fn new(options: ClientOptions, transport: Arc<dyn Transport>) -> Self {
        let executor: Arc<dyn Executor> = if options.synchronous {
            Arc::new(InlineExecutor)
        } else {
            Arc::new(ThreadPool::from_options(&options))
        };
        Self {
            options,
            transport,
            executor: RwLock::new(executor),
            default_headers: RwLock::new(Vec::new()),
        }
    }

    /// A client backed by `ureq`.
    #[cfg(feature = "ureq")]
    pub fn with_ureq(options: ClientOptions) -> Self {
        let transport = Arc::new(crate::transport::UreqTransport::new(&options));
        Self::new(options, transport)
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn is_synchronous(&self) -> bool {
        self.options.synchronous
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// The executor new tasks are submitted to.
    pub fn thread_pool(&self) -> Arc<dyn Executor> {
        Arc::clone(&self.executor.read())
    }

    /// Replace the executor. Tasks already submitted finish on the old one.
    pub fn set_thread_pool(&self, executor: Arc<dyn Executor>) {
        *self.executor.write() = executor;
    }

    /// Add a header sent with every request. Replaces an existing default of
    /// the same name.
    pub fn add_header(&self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let mut headers = self.default_headers.write();
        headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        headers.push((name, value.into()));
    }

    pub fn remove_header(&self, name: &str) {
        self.default_headers
            .write()
            .retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    fn merged_headers(&self, headers: &[Header]) -> Vec<Header> {
        let mut merged = Vec::with_capacity(headers.len() + 2);
        if let Some(agent) = &self.options.user_agent {
            merged.push(("User-Agent".to_string(), agent.clone()));
        }
        merged.extend(self.default_headers.read().iter().cloned());
        merged.extend(headers.iter().cloned());
        merged
    }

    /// Build the request a verb method would send.
    ///
    /// For methods that carry a body the parameters become the entity;
    /// otherwise they are appended to the URL as a query string.
    pub fn build_request(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &[Header],
        params: Option<&RequestParams>,
    ) -> Result<HttpRequest, ClientError> {
        let (url, body) = if method.encloses_entity() {
            let body = params
                .map(|p| entity::build(p, p.uses_json_streamer()))
                .transpose()?;
            (url_with_query_string(url, None, self.options.url_encoding_enabled)?, body)
        } else {
            (url_with_query_string(url, params, self.options.url_encoding_enabled)?, None)
        };
        Ok(HttpRequest {
            method,
            url,
            headers: self.merged_headers(headers),
            body,
        })
    }

    /// Build the request for a pre-built entity.
    pub fn build_entity_request(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &[Header],
        entity: Option<Entity>,
    ) -> Result<HttpRequest, ClientError> {
        Ok(HttpRequest {
            method,
            url: url_with_query_string(url, None, self.options.url_encoding_enabled)?,
            headers: self.merged_headers(headers),
            body: entity,
        })
    }

    with_params! {
        get => Get,
        head => Head,
        delete => Delete,
        options_request => Options,
        trace => Trace,
        post => Post,
        put => Put,
        patch => Patch,
    }

    with_entity! {
        post_entity => Post,
        put_entity => Put,
        patch_entity => Patch,
    }

    /// Build a request from `params` and dispatch it.
    pub fn request<H: ResponseHandler>(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &[Header],
        params: Option<&RequestParams>,
        handler: H,
    ) -> Result<RequestHandle, ClientError> {
        let request = self.build_request(method, url, headers, params)?;
        Ok(self.execute(request, handler))
    }

    /// Dispatch a request with an explicit (possibly absent) entity.
    pub fn dispatch<H: ResponseHandler>(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &[Header],
        entity: Option<Entity>,
        handler: H,
    ) -> Result<RequestHandle, ClientError> {
        let request = self.build_entity_request(method, url, headers, entity)?;
        Ok(self.execute(request, handler))
    }

    /// Run an already built request.
    pub fn execute<H: ResponseHandler>(&self, request: HttpRequest, handler: H) -> RequestHandle {
        let task = RequestTask::new(request, Arc::clone(&self.transport), Arc::new(handler));
        let handle = task.handle();
        task.admit();
        if self.options.synchronous {
            task.run();
        } else {
            self.thread_pool().execute(Box::new(move || task.run()));
        }
        handle
    }

    /// Purge idle transport connections. In-flight tasks are not touched.
    pub fn cancel_all_requests(&self, may_interrupt: bool) -> bool {
        debug!(may_interrupt, "closing expired connections");
        self.transport.close_expired_connections();
        true
    }
}
