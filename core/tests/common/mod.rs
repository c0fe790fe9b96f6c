//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use async_http_core::{BodyDecoder, ClientError, DecodeFailure, Header, ResponseHandler};
use crossbeam_channel::{Receiver, Sender};

/// Start the echo server on a random port in a background thread.
pub fn spawn_server() -> SocketAddr {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });

    addr
}

/// One handler callback, as observed by a test.
#[derive(Debug)]
pub enum Event<B> {
    Headers(Vec<Header>),
    Start,
    Progress(u64, Option<u64>),
    Retry(u32),
    Success(u16, Vec<Header>, B),
    Failure(u16, Option<B>, String),
    Cancel,
    Finish,
}

impl<B> Event<B> {
    pub fn label(&self) -> &'static str {
        match self {
            Event::Headers(_) => "headers",
            Event::Start => "start",
            Event::Progress(..) => "progress",
            Event::Retry(_) => "retry",
            Event::Success(..) => "success",
            Event::Failure(..) => "failure",
            Event::Cancel => "cancel",
            Event::Finish => "finish",
        }
    }
}

/// A handler that forwards every callback into a channel.
pub struct Probe<D: BodyDecoder> {
    decoder: D,
    events: Sender<Event<D::Output>>,
}

impl<D: BodyDecoder> Probe<D> {
    pub fn new(decoder: D) -> (Self, Receiver<Event<D::Output>>) {
        let (events, rx) = crossbeam_channel::unbounded();
        (Self { decoder, events }, rx)
    }

    fn emit(&self, event: Event<D::Output>) {
        let _ = self.events.send(event);
    }
}

impl<D: BodyDecoder> ResponseHandler for Probe<D> {
    type Body = D::Output;

    fn decode(&self, raw: &[u8]) -> Result<D::Output, DecodeFailure<D::Output>> {
        self.decoder.decode(raw)
    }

    fn on_request_headers(&self, headers: &[Header]) {
        self.emit(Event::Headers(headers.to_vec()));
    }

    fn on_start(&self) {
        self.emit(Event::Start);
    }

    fn on_progress(&self, transferred: u64, total: Option<u64>) {
        self.emit(Event::Progress(transferred, total));
    }

    fn on_retry(&self, attempt: u32) {
        self.emit(Event::Retry(attempt));
    }

    fn on_success(&self, status: u16, headers: &[Header], body: D::Output) {
        self.emit(Event::Success(status, headers.to_vec(), body));
    }

    fn on_failure(&self, status: u16, _headers: &[Header], body: Option<D::Output>, cause: &ClientError) {
        self.emit(Event::Failure(status, body, cause.to_string()));
    }

    fn on_cancel(&self) {
        self.emit(Event::Cancel);
    }

    fn on_finish(&self) {
        self.emit(Event::Finish);
    }
}

/// Drain events up to and including `Finish`.
pub fn until_finish<B>(rx: &Receiver<Event<B>>) -> Vec<Event<B>> {
    let mut events = Vec::new();
    loop {
        let event = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("handler never finished");
        let done = matches!(event, Event::Finish);
        events.push(event);
        if done {
            return events;
        }
    }
}

/// Every event label, progress included.
pub fn labels<B>(events: &[Event<B>]) -> Vec<&'static str> {
    events.iter().map(Event::label).collect()
}

/// Event labels with progress collapsed out.
pub fn lifecycle<B>(events: &[Event<B>]) -> Vec<&'static str> {
    events
        .iter()
        .filter(|e| !matches!(e, Event::Progress(..)))
        .map(Event::label)
        .collect()
}

/// The body of the single `Success` event.
pub fn success_body<B>(events: Vec<Event<B>>) -> (u16, B) {
    for event in events {
        if let Event::Success(status, _, body) = event {
            return (status, body);
        }
    }
    panic!("no success event");
}
