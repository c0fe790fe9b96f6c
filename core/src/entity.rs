//! Request body entities and the policy that picks one.
//!
//! # Design
//! `build` snapshots a `RequestParams` and chooses, in priority order:
//! 1. a streamed JSON object when JSON streaming is requested,
//! 2. an `application/x-www-form-urlencoded` body when there are no files or
//!    streams,
//! 3. a `multipart/form-data` body otherwise.
//!
//! Form bodies are encoded eagerly because they are small and must fail early
//! on an unknown charset. Multipart and JSON bodies are written lazily: file
//! contents are read and streams are drained only when the transport calls
//! `write_to`, with progress reported per chunk written.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::write::EncoderWriter;
use encoding_rs::Encoding;
use uuid::Uuid;

use crate::error::ClientError;
use crate::params::{FileEntry, RequestParams, Snapshot, StreamEntry};
use crate::transport::{NoopObserver, TransferObserver};

pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
pub const APPLICATION_JSON: &str = "application/json";

/// Which wire representation an entity uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    UrlEncoded,
    Multipart,
    Json,
    Raw,
}

/// A serialized request body plus its declared content type.
///
/// Cloning is cheap and shares the underlying parts, including any
/// single-use streams.
#[derive(Clone)]
pub struct Entity {
    body: Arc<Body>,
    content_type: String,
    repeatable: bool,
}

enum Body {
    Bytes(Vec<u8>, EntityKind),
    Multipart(Multipart),
    Json(Vec<(String, JsonMember)>),
}

struct Multipart {
    boundary: String,
    parts: Vec<Part>,
}

struct Part {
    header: Vec<u8>,
    content: PartContent,
}

enum PartContent {
    Text(String),
    File(FileEntry),
    Stream(String, StreamEntry),
}

enum JsonMember {
    Inline(serde_json::Value),
    File(FileEntry),
    Stream(String, StreamEntry),
}

impl Entity {
    /// A pre-encoded body the caller built by hand. Always repeatable.
    pub fn raw(body: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            body: Arc::new(Body::Bytes(body.into(), EntityKind::Raw)),
            content_type: content_type.into(),
            repeatable: true,
        }
    }

    /// A serialized JSON document as a raw body.
    pub fn json_document(value: &serde_json::Value) -> Self {
        Self::raw(value.to_string(), APPLICATION_JSON)
    }

    pub fn kind(&self) -> EntityKind {
        match &*self.body {
            Body::Bytes(_, kind) => *kind,
            Body::Multipart(_) => EntityKind::Multipart,
            Body::Json(_) => EntityKind::Json,
        }
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Whether the body can be sent more than once (retries, redirects).
    pub fn is_repeatable(&self) -> bool {
        self.repeatable
    }

    /// The multipart boundary, if this is a multipart entity.
    pub fn boundary(&self) -> Option<&str> {
        match &*self.body {
            Body::Multipart(multipart) => Some(&multipart.boundary),
            _ => None,
        }
    }

    /// Total body length when it can be known without reading streams.
    pub fn content_length(&self) -> Option<u64> {
        match &*self.body {
            Body::Bytes(bytes, _) => Some(bytes.len() as u64),
            Body::Multipart(multipart) => multipart.content_length(),
            Body::Json(_) => None,
        }
    }

    /// Write the body to `out`, reporting bytes written to `observer`.
    /// Returns the number of bytes written.
    pub fn write_to(
        &self,
        out: &mut dyn Write,
        observer: &dyn TransferObserver,
    ) -> Result<u64, ClientError> {
        let mut out = ProgressWriter {
            inner: out,
            written: 0,
            total: self.content_length(),
            observer,
        };
        match &*self.body {
            Body::Bytes(bytes, _) => out.write_all(bytes)?,
            Body::Multipart(multipart) => multipart.write_to(&mut out)?,
            Body::Json(members) => write_json(members, &mut out)?,
        }
        out.flush()?;
        Ok(out.written)
    }

    /// Write the whole body into memory.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ClientError> {
        let mut buf = Vec::with_capacity(self.content_length().unwrap_or(0) as usize);
        self.write_to(&mut buf, &NoopObserver)?;
        Ok(buf)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("kind", &self.kind())
            .field("content_type", &self.content_type)
            .field("repeatable", &self.repeatable)
            .finish()
    }
}

/// Build the body entity for `params`.
///
/// Fails with `UnsupportedEncoding` when a form body is selected and the
/// container's charset label is unknown, and with `StreamAlreadyConsumed`
/// when a stream parameter was drained by an earlier body.
pub fn build(params: &RequestParams, streaming_json: bool) -> Result<Entity, ClientError> {
    let snapshot = params.snapshot();
    if let Some((key, _)) = snapshot
        .stream_params
        .iter()
        .find(|(_, entry)| entry.source.is_consumed())
    {
        return Err(ClientError::StreamAlreadyConsumed(key.clone()));
    }

    if streaming_json {
        Ok(build_json(snapshot))
    } else if snapshot.stream_params.is_empty() && snapshot.file_params.is_empty() {
        build_form(&snapshot)
    } else {
        Ok(build_multipart(snapshot))
    }
}

/// Look up a charset by its WHATWG label.
pub(crate) fn resolve_encoding(label: &str) -> Result<&'static Encoding, ClientError> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| ClientError::UnsupportedEncoding(label.to_string()))
}

/// Form-encode pairs: charset-encode each side, then percent-encode with
/// `+` for space.
pub(crate) fn form_encode(pairs: &[(String, String)], encoding: &'static Encoding) -> String {
    let encode = |text: &str| -> String {
        let (bytes, _, _) = encoding.encode(text);
        form_urlencoded::byte_serialize(&bytes).collect()
    };
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn build_form(snapshot: &Snapshot) -> Result<Entity, ClientError> {
    let encoding = resolve_encoding(&snapshot.content_encoding)?;
    let body = form_encode(&snapshot.flat_pairs(), encoding);
    Ok(Entity {
        body: Arc::new(Body::Bytes(body.into_bytes(), EntityKind::UrlEncoded)),
        content_type: format!("{FORM_URLENCODED}; charset={}", encoding.name()),
        repeatable: snapshot.repeatable,
    })
}

fn build_multipart(snapshot: Snapshot) -> Entity {
    let boundary = format!("--------------------{}", Uuid::new_v4().simple());
    let mut parts = Vec::new();

    for (key, value) in snapshot.flat_pairs() {
        parts.push(Part {
            header: text_part_header(&boundary, &key),
            content: PartContent::Text(value),
        });
    }
    for (key, entry) in snapshot.stream_params {
        parts.push(Part {
            header: binary_part_header(&boundary, &key, &entry.name, &entry.content_type),
            content: PartContent::Stream(key, entry),
        });
    }
    for (key, entry) in snapshot.file_params {
        parts.push(Part {
            header: binary_part_header(&boundary, &key, &entry.file_name(), entry.content_type()),
            content: PartContent::File(entry),
        });
    }

    Entity {
        content_type: format!("multipart/form-data; boundary={boundary}"),
        body: Arc::new(Body::Multipart(Multipart { boundary, parts })),
        repeatable: snapshot.repeatable,
    }
}

fn build_json(snapshot: Snapshot) -> Entity {
    let repeatable = snapshot.stream_params.is_empty();
    let mut members = Vec::new();
    for (key, value) in snapshot.url_params {
        members.push((key, JsonMember::Inline(serde_json::Value::String(value))));
    }
    for (key, value) in snapshot.object_params {
        let json = value.to_json();
        members.push((key, JsonMember::Inline(json)));
    }
    for (key, entry) in snapshot.file_params {
        members.push((key, JsonMember::File(entry)));
    }
    for (key, entry) in snapshot.stream_params {
        members.push((key.clone(), JsonMember::Stream(key, entry)));
    }
    Entity {
        body: Arc::new(Body::Json(members)),
        content_type: APPLICATION_JSON.to_string(),
        repeatable,
    }
}

fn quote_name(name: &str) -> String {
    name.replace('"', "%22").replace('\r', "%0D").replace('\n', "%0A")
}

fn text_part_header(boundary: &str, key: &str) -> Vec<u8> {
    format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"{}\"\r\n\
         Content-Type: text/plain; charset=UTF-8\r\n\r\n",
        quote_name(key)
    )
    .into_bytes()
}

fn binary_part_header(boundary: &str, key: &str, file_name: &str, content_type: &str) -> Vec<u8> {
    format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
         Content-Type: {content_type}\r\n\
         Content-Transfer-Encoding: binary\r\n\r\n",
        quote_name(key),
        quote_name(file_name)
    )
    .into_bytes()
}

impl Multipart {
    fn trailer(&self) -> String {
        format!("--{}--\r\n", self.boundary)
    }

    fn content_length(&self) -> Option<u64> {
        let mut total = self.trailer().len() as u64;
        for part in &self.parts {
            let content = match &part.content {
                PartContent::Text(text) => text.len() as u64,
                PartContent::File(entry) => fs::metadata(&entry.path).ok()?.len(),
                PartContent::Stream(..) => return None,
            };
            total += part.header.len() as u64 + content + 2;
        }
        Some(total)
    }

    fn write_to(&self, out: &mut dyn Write) -> Result<(), ClientError> {
        for part in &self.parts {
            out.write_all(&part.header)?;
            match &part.content {
                PartContent::Text(text) => out.write_all(text.as_bytes())?,
                PartContent::File(entry) => {
                    let mut file = File::open(&entry.path)?;
                    io::copy(&mut file, &mut *out)?;
                }
                PartContent::Stream(key, entry) => copy_stream(key, entry, &mut *out)?,
            }
            out.write_all(b"\r\n")?;
        }
        out.write_all(self.trailer().as_bytes())?;
        Ok(())
    }
}

fn copy_stream(key: &str, entry: &StreamEntry, out: &mut dyn Write) -> Result<(), ClientError> {
    let mut reader = entry.source.take(key)?;
    let copied = io::copy(&mut reader, out);
    entry.source.release(reader, entry.auto_close);
    copied?;
    Ok(())
}

fn write_json(members: &[(String, JsonMember)], out: &mut dyn Write) -> Result<(), ClientError> {
    out.write_all(b"{")?;
    for (index, (key, member)) in members.iter().enumerate() {
        if index > 0 {
            out.write_all(b",")?;
        }
        serde_json::to_writer(&mut *out, key).map_err(io::Error::from)?;
        out.write_all(b":")?;
        match member {
            JsonMember::Inline(value) => {
                serde_json::to_writer(&mut *out, value).map_err(io::Error::from)?;
            }
            JsonMember::File(entry) => {
                write_binary_header(out, &entry.file_name(), entry.content_type())?;
                let mut file = File::open(&entry.path)?;
                {
                    let mut encoder = EncoderWriter::new(&mut *out, &STANDARD);
                    io::copy(&mut file, &mut encoder)?;
                    encoder.finish()?;
                }
                out.write_all(b"\"}")?;
            }
            JsonMember::Stream(key, entry) => {
                write_binary_header(out, &entry.name, &entry.content_type)?;
                {
                    let mut encoder = EncoderWriter::new(&mut *out, &STANDARD);
                    copy_stream(key, entry, &mut encoder)?;
                    encoder.finish()?;
                }
                out.write_all(b"\"}")?;
            }
        }
    }
    out.write_all(b"}")?;
    Ok(())
}

/// Opens a binary member object up to the start of its base64 contents.
fn write_binary_header(out: &mut dyn Write, name: &str, content_type: &str) -> io::Result<()> {
    out.write_all(b"{\"name\":")?;
    serde_json::to_writer(&mut *out, name)?;
    out.write_all(b",\"type\":")?;
    serde_json::to_writer(&mut *out, content_type)?;
    out.write_all(b",\"contents\":\"")
}

struct ProgressWriter<'a> {
    inner: &'a mut dyn Write,
    written: u64,
    total: Option<u64>,
    observer: &'a dyn TransferObserver,
}

impl Write for ProgressWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if n > 0 {
            self.written += n as u64;
            self.observer.on_progress(self.written, self.total);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
