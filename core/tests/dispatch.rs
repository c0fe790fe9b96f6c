//! Dispatcher behavior with stub transports: fan-out, callback ordering and
//! cancellation, without any network.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_http_core::transport::from_fn;
use async_http_core::{
    AsyncHttpClient, BodyDecoder, BytesDecoder, ClientError, ClientOptions, DecodeFailure,
    Executor, Header, HttpRequest, HttpResponse, RequestParams, ResponseHandler, TextDecoder,
    ThreadPool, TransferObserver, Transport,
};
use common::{labels, lifecycle, until_finish, Event, Probe};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

fn instant_transport() -> Arc<dyn Transport> {
    Arc::new(from_fn(|request: &HttpRequest| {
        Ok(HttpResponse {
            status: 200,
            headers: vec![("x-url".into(), request.url.clone())],
            body: request.url.as_bytes().to_vec(),
        })
    }))
}

/// A transport that drives the observer from a closure before answering.
struct Scripted<F>(F);

impl<F> Transport for Scripted<F>
where
    F: Fn(&HttpRequest, &dyn TransferObserver) -> Result<HttpResponse, ClientError> + Send + Sync,
{
    fn execute(
        &self,
        request: &HttpRequest,
        observer: &dyn TransferObserver,
    ) -> Result<HttpResponse, ClientError> {
        (self.0)(request, observer)
    }
}

/// Records callbacks per task id, flagging any overlap between two callbacks
/// of the same task.
struct Ledger {
    id: usize,
    busy: Arc<Mutex<HashMap<usize, bool>>>,
    log: Arc<Mutex<Vec<(usize, &'static str)>>>,
    overlaps: Arc<AtomicUsize>,
    done: Sender<usize>,
}

impl Ledger {
    fn record(&self, event: &'static str) {
        {
            let mut busy = self.busy.lock();
            let entered = busy.entry(self.id).or_insert(false);
            if *entered {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            *entered = true;
        }
        std::thread::yield_now();
        self.log.lock().push((self.id, event));
        self.busy.lock().insert(self.id, false);
    }
}

impl ResponseHandler for Ledger {
    type Body = String;

    fn decode(&self, raw: &[u8]) -> Result<String, DecodeFailure<String>> {
        TextDecoder::default().decode(raw)
    }

    fn on_start(&self) {
        self.record("start");
    }

    fn on_success(&self, _status: u16, _headers: &[Header], _body: String) {
        self.record("success");
    }

    fn on_failure(&self, _status: u16, _headers: &[Header], _body: Option<String>, _cause: &ClientError) {
        self.record("failure");
    }

    fn on_cancel(&self) {
        self.record("cancel");
    }

    fn on_finish(&self) {
        self.record("finish");
        let _ = self.done.send(self.id);
    }
}

#[test]
fn hundred_tasks_each_finish_exactly_once() {
    let client = AsyncHttpClient::new(ClientOptions::default(), instant_transport());
    let busy = Arc::new(Mutex::new(HashMap::new()));
    let log = Arc::new(Mutex::new(Vec::new()));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let (done, finished): (Sender<usize>, Receiver<usize>) = crossbeam_channel::unbounded();

    for id in 0..100 {
        let handler = Ledger {
            id,
            busy: Arc::clone(&busy),
            log: Arc::clone(&log),
            overlaps: Arc::clone(&overlaps),
            done: done.clone(),
        };
        client
            .get(&format!("http://stub.local/item/{id}"), &[], None, handler)
            .unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..100 {
        seen.push(finished.recv_timeout(Duration::from_secs(10)).unwrap());
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..100).collect::<Vec<_>>());
    assert!(finished.recv_timeout(Duration::from_millis(100)).is_err());

    let log = log.lock();
    for id in 0..100 {
        let events: Vec<_> = log.iter().filter(|(i, _)| *i == id).map(|(_, e)| *e).collect();
        assert_eq!(events, ["start", "success", "finish"], "task {id}");
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn bounded_pool_still_completes_every_task() {
    let client = AsyncHttpClient::new(ClientOptions::default().with_max_workers(2), instant_transport());
    let receivers: Vec<_> = (0..20)
        .map(|i| {
            let (probe, rx) = Probe::new(TextDecoder::default());
            client
                .get(&format!("http://stub.local/{i}"), &[], None, probe)
                .unwrap();
            rx
        })
        .collect();

    for rx in &receivers {
        assert_eq!(lifecycle(&until_finish(rx)), ["start", "headers", "success", "finish"]);
    }
}

#[test]
fn cancel_before_worker_picks_up_skips_transport() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let transport: Arc<dyn Transport> = Arc::new(from_fn(move |_: &HttpRequest| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(HttpResponse::default())
    }));
    let client = AsyncHttpClient::new(ClientOptions::default(), transport);

    // A single worker kept busy so the next task stays queued.
    let pool = Arc::new(ThreadPool::bounded(1));
    client.set_thread_pool(pool.clone());
    let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
    pool.execute(Box::new(move || {
        let _ = gate_rx.recv_timeout(Duration::from_secs(10));
    }));

    let (probe, rx) = Probe::new(TextDecoder::default());
    let handle = client.get("http://stub.local/", &[], None, probe).unwrap();
    assert!(handle.cancel(true));
    gate_tx.send(()).unwrap();

    assert_eq!(lifecycle(&until_finish(&rx)), ["start", "headers", "cancel", "finish"]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn cancel_mid_flight_discards_result() {
    let (entered_tx, entered_rx) = crossbeam_channel::bounded::<()>(1);
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
    let transport: Arc<dyn Transport> = Arc::new(from_fn(move |_: &HttpRequest| {
        let _ = entered_tx.send(());
        let _ = release_rx.recv_timeout(Duration::from_secs(10));
        Ok(HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: b"too late".to_vec(),
        })
    }));
    let client = AsyncHttpClient::new(ClientOptions::default(), transport);

    let (probe, rx) = Probe::new(TextDecoder::default());
    let handle = client.get("http://stub.local/", &[], None, probe).unwrap();
    entered_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(handle.cancel(false));
    release_tx.send(()).unwrap();

    assert_eq!(lifecycle(&until_finish(&rx)), ["start", "headers", "cancel", "finish"]);
    assert!(handle.should_be_garbage_collected());
}

#[test]
fn panicking_transport_still_finishes() {
    let transport: Arc<dyn Transport> =
        Arc::new(from_fn(|_: &HttpRequest| -> Result<HttpResponse, ClientError> {
            panic!("transport bug")
        }));
    let client = AsyncHttpClient::new(ClientOptions::default(), transport);
    let (probe, rx) = Probe::new(TextDecoder::default());
    client.get("http://stub.local/", &[], None, probe).unwrap();

    assert_eq!(lifecycle(&until_finish(&rx)), ["start", "headers", "failure", "finish"]);
}

#[test]
fn request_headers_follow_start() {
    let client = AsyncHttpClient::new(
        ClientOptions::synchronous().with_user_agent("probe/2"),
        instant_transport(),
    );
    let (recorder, rx) = Probe::new(TextDecoder::default());
    client
        .get("http://stub.local/", &[("Accept".into(), "text/plain".into())], None, recorder)
        .unwrap();

    let events = until_finish(&rx);
    assert!(matches!(events[0], common::Event::Start));
    match &events[1] {
        common::Event::Headers(headers) => assert_eq!(
            headers,
            &vec![
                ("User-Agent".to_string(), "probe/2".to_string()),
                ("Accept".to_string(), "text/plain".to_string()),
            ]
        ),
        other => panic!("expected headers after start, got {other:?}"),
    }
}

#[test]
fn transport_retries_and_progress_arrive_between_start_and_success() {
    let transport: Arc<dyn Transport> = Arc::new(Scripted(
        |_: &HttpRequest, observer: &dyn TransferObserver| {
            observer.on_retry(1);
            observer.on_progress(5, Some(10));
            observer.on_progress(10, Some(10));
            Ok(HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: b"done".to_vec(),
            })
        },
    ));
    let client = AsyncHttpClient::new(ClientOptions::default(), transport);
    let (recorder, rx) = Probe::new(TextDecoder::default());
    client.get("http://stub.local/", &[], None, recorder).unwrap();

    let events = until_finish(&rx);
    assert_eq!(
        labels(&events),
        ["start", "headers", "retry", "progress", "progress", "success", "finish"]
    );
    assert!(matches!(events[2], Event::Retry(1)));
    assert!(matches!(events[4], Event::Progress(10, Some(10))));
}

#[test]
fn transfer_events_after_cancel_are_dropped() {
    let (entered_tx, entered_rx) = crossbeam_channel::bounded::<()>(1);
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
    let transport: Arc<dyn Transport> = Arc::new(Scripted(
        move |_: &HttpRequest, observer: &dyn TransferObserver| {
            let _ = entered_tx.send(());
            let _ = release_rx.recv_timeout(Duration::from_secs(10));
            observer.on_retry(2);
            observer.on_progress(1, None);
            Ok(HttpResponse::default())
        },
    ));
    let client = AsyncHttpClient::new(ClientOptions::default(), transport);

    let (recorder, rx) = Probe::new(TextDecoder::default());
    let handle = client.get("http://stub.local/", &[], None, recorder).unwrap();
    entered_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(handle.cancel(false));
    release_tx.send(()).unwrap();

    assert_eq!(labels(&until_finish(&rx)), ["start", "headers", "cancel", "finish"]);
}

#[test]
fn upload_progress_reaches_handler_through_task() {
    let transport: Arc<dyn Transport> = Arc::new(Scripted(
        |request: &HttpRequest, observer: &dyn TransferObserver| {
            let mut sent = Vec::new();
            if let Some(body) = &request.body {
                body.write_to(&mut sent, observer)?;
            }
            Ok(HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: sent,
            })
        },
    ));
    let client = AsyncHttpClient::new(ClientOptions::synchronous(), transport);
    let params = RequestParams::from_pairs([("name", "Java"), ("lang", "Rust")]);
    let (recorder, rx) = Probe::new(BytesDecoder);
    client
        .post("http://stub.local/", &[], Some(&params), recorder)
        .unwrap();

    let events: Vec<_> = rx.try_iter().collect();
    let sent_len = b"name=Java&lang=Rust".len() as u64;
    let progress: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::Progress(done, total) => Some((*done, *total)),
            _ => None,
        })
        .collect();
    assert_eq!(progress.last(), Some(&(sent_len, Some(sent_len))));
    assert!(!progress.is_empty());

    let seen = labels(&events);
    assert_eq!(seen[..2], ["start", "headers"]);
    assert_eq!(seen[seen.len() - 2..], ["success", "finish"]);
    assert!(seen[2..seen.len() - 2].iter().all(|l| *l == "progress"));
}
