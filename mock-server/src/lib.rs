//! An HTTP echo server for exercising the client end to end.
//!
//! Every route reports back what it received (query pairs, form pairs,
//! multipart parts, JSON bodies) so tests can assert on the exact wire
//! encoding the client produced. A few routes produce canned responses:
//! arbitrary status codes, a BOM-prefixed JSON document, slow and sized
//! bodies.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, Multipart, Path},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    routing::{any, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::debug;

/// What `/echo` saw.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EchoReport {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
}

/// What `/form` decoded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FormReport {
    pub content_type: Option<String>,
    pub pairs: Vec<(String, String)>,
}

/// One part seen by `/multipart`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartReport {
    pub name: Option<String>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size: usize,
    pub text: Option<String>,
}

/// Body served by `/bom`.
pub const BOM_JSON: &str = "\u{FEFF}{\"a\":1}";

pub fn app() -> Router {
    Router::new()
        .route("/echo", any(echo))
        .route("/form", post(form).put(form).patch(form))
        .route("/multipart", post(multipart).put(multipart))
        .route("/json", post(json).put(json).patch(json))
        .route("/status/{code}", any(status))
        .route("/bom", get(bom))
        .route("/slow/{ms}", get(slow))
        .route("/bytes/{len}", get(sized))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn parse_pairs(input: &[u8]) -> Vec<(String, String)> {
    form_urlencoded::parse(input).into_owned().collect()
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap) -> Json<EchoReport> {
    debug!(%method, %uri, "echo");
    let query = parse_pairs(uri.query().unwrap_or_default().as_bytes());
    let headers = headers
        .iter()
        .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
        .collect();
    Json(EchoReport {
        method: method.to_string(),
        path: uri.path().to_string(),
        query,
        headers,
    })
}

async fn form(headers: HeaderMap, body: Bytes) -> Json<FormReport> {
    Json(FormReport {
        content_type: header_value(&headers, header::CONTENT_TYPE),
        pairs: parse_pairs(&body),
    })
}

async fn multipart(mut multipart: Multipart) -> Result<Json<Vec<PartReport>>, MultipartError> {
    let mut parts = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await?;
        debug!(?name, size = data.len(), "multipart part");
        parts.push(PartReport {
            name,
            file_name,
            content_type,
            size: data.len(),
            text: String::from_utf8(data.to_vec()).ok(),
        });
    }
    Ok(Json(parts))
}

async fn json(Json(value): Json<serde_json::Value>) -> Json<serde_json::Value> {
    Json(value)
}

async fn status(Path(code): Path<u16>) -> (StatusCode, String) {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    (status, format!("status {code}"))
}

async fn bom() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], BOM_JSON)
}

async fn slow(Path(ms): Path<u64>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "done"
}

async fn sized(Path(len): Path<usize>) -> Vec<u8> {
    vec![b'x'; len]
}
