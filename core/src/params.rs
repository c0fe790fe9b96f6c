//! The request parameter container.
//!
//! # Design
//! `RequestParams` keeps four independent mappings: plain strings, files,
//! single-use byte streams, and structured values. Each mapping sits behind
//! its own `RwLock`, so concurrent `put`/`append`/`remove` calls from several
//! threads are individually atomic without any cross-key transaction. Every
//! mutator takes `&self`, which lets one container be shared through an `Arc`.
//!
//! Entries keep insertion order within a mapping. Building a body takes a
//! point-in-time snapshot; mutations racing a build may or may not be seen.
//!
//! Byte streams are consumable exactly once. The first body that writes a
//! stream takes it; any later attempt fails with
//! `ClientError::StreamAlreadyConsumed` instead of sending an empty part.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use crate::entity::{self, Entity};
use crate::error::ClientError;
use crate::flatten::flatten_all;
use crate::value::Value;

pub const APPLICATION_OCTET_STREAM: &str = "application/octet-stream";
pub const DEFAULT_CONTENT_ENCODING: &str = "UTF-8";

type BoxedReader = Box<dyn Read + Send>;

enum StreamSlot {
    Ready(BoxedReader),
    /// Written once but kept open because auto-close was off.
    Retained(BoxedReader),
    Closed,
}

/// Shared, take-once holder for a stream parameter's reader.
pub(crate) struct StreamSource {
    slot: Mutex<StreamSlot>,
}

impl StreamSource {
    fn new(reader: BoxedReader) -> Self {
        Self {
            slot: Mutex::new(StreamSlot::Ready(reader)),
        }
    }

    pub(crate) fn is_consumed(&self) -> bool {
        !matches!(*self.slot.lock(), StreamSlot::Ready(_))
    }

    /// Take the reader for writing. Fails if any earlier body already did.
    pub(crate) fn take(&self, key: &str) -> Result<BoxedReader, ClientError> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, StreamSlot::Closed) {
            StreamSlot::Ready(reader) => Ok(reader),
            other => {
                *slot = other;
                Err(ClientError::StreamAlreadyConsumed(key.to_string()))
            }
        }
    }

    /// Hand the exhausted reader back. Dropping it closes the stream.
    pub(crate) fn release(&self, reader: BoxedReader, auto_close: bool) {
        if !auto_close {
            *self.slot.lock() = StreamSlot::Retained(reader);
        }
    }
}

/// A byte-stream parameter under construction.
pub struct StreamParam {
    reader: BoxedReader,
    name: Option<String>,
    content_type: Option<String>,
    auto_close: Option<bool>,
}

impl StreamParam {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            name: None,
            content_type: None,
            auto_close: None,
        }
    }

    /// The file name reported for the part. Defaults to the parameter key.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Defaults to `application/octet-stream`.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Close (drop) the reader after a successful upload. Defaults to the
    /// container's `auto_close_streams` setting at insertion time.
    pub fn auto_close(mut self, auto_close: bool) -> Self {
        self.auto_close = Some(auto_close);
        self
    }
}

/// A stored stream parameter.
#[derive(Clone)]
pub(crate) struct StreamEntry {
    pub(crate) source: Arc<StreamSource>,
    pub(crate) name: String,
    pub(crate) content_type: String,
    pub(crate) auto_close: bool,
}

/// A stored file parameter.
#[derive(Debug, Clone)]
pub(crate) struct FileEntry {
    pub(crate) path: PathBuf,
    pub(crate) content_type: Option<String>,
}

impl FileEntry {
    pub(crate) fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub(crate) fn content_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or(APPLICATION_OCTET_STREAM)
    }
}

#[derive(Debug, Clone)]
struct Settings {
    content_encoding: String,
    repeatable: bool,
    use_json_streamer: bool,
    auto_close_streams: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            content_encoding: DEFAULT_CONTENT_ENCODING.to_string(),
            repeatable: false,
            use_json_streamer: false,
            auto_close_streams: false,
        }
    }
}

/// A consistent copy of the container taken at build time.
pub(crate) struct Snapshot {
    pub(crate) url_params: IndexMap<String, String>,
    pub(crate) stream_params: IndexMap<String, StreamEntry>,
    pub(crate) file_params: IndexMap<String, FileEntry>,
    pub(crate) object_params: IndexMap<String, Value>,
    pub(crate) content_encoding: String,
    pub(crate) repeatable: bool,
}

impl Snapshot {
    /// Plain strings first, then the flattened structured values.
    pub(crate) fn flat_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .url_params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        pairs.extend(flatten_all(
            self.object_params.iter().map(|(k, v)| (k.as_str(), v)),
        ));
        pairs
    }
}

/// Named request parameters: strings, files, streams and structured values.
#[derive(Default)]
pub struct RequestParams {
    url_params: RwLock<IndexMap<String, String>>,
    stream_params: RwLock<IndexMap<String, StreamEntry>>,
    file_params: RwLock<IndexMap<String, FileEntry>>,
    object_params: RwLock<IndexMap<String, Value>>,
    settings: RwLock<Settings>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a container holding the given plain string pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let params = Self::new();
        for (key, value) in pairs {
            params.put(key, value);
        }
        params
    }

    /// Set a plain string parameter, replacing any previous string value.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) -> &Self {
        self.url_params.write().insert(key.into(), value.into());
        self
    }

    pub fn put_int(&self, key: impl Into<String>, value: i64) -> &Self {
        self.put(key, value.to_string())
    }

    /// Add a file part. Fails with `FileNotFound` if `path` does not exist.
    pub fn put_file(
        &self,
        key: impl Into<String>,
        path: impl AsRef<Path>,
        content_type: Option<&str>,
    ) -> Result<&Self, ClientError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ClientError::FileNotFound(path.to_path_buf()));
        }
        self.file_params.write().insert(
            key.into(),
            FileEntry {
                path: path.to_path_buf(),
                content_type: content_type.map(str::to_string),
            },
        );
        Ok(self)
    }

    /// Add a single-use byte stream.
    pub fn put_stream(&self, key: impl Into<String>, stream: StreamParam) -> &Self {
        let key = key.into();
        let auto_close = stream
            .auto_close
            .unwrap_or_else(|| self.settings.read().auto_close_streams);
        let entry = StreamEntry {
            source: Arc::new(StreamSource::new(stream.reader)),
            name: stream.name.unwrap_or_else(|| key.clone()),
            content_type: stream
                .content_type
                .unwrap_or_else(|| APPLICATION_OCTET_STREAM.to_string()),
            auto_close,
        };
        self.stream_params.write().insert(key, entry);
        self
    }

    /// Set a structured parameter (map, list, set or scalar).
    pub fn put_value(&self, key: impl Into<String>, value: impl Into<Value>) -> &Self {
        self.object_params.write().insert(key.into(), value.into());
        self
    }

    /// Set a structured parameter from JSON. `null` object members are skipped.
    pub fn put_json(&self, key: impl Into<String>, value: serde_json::Value) -> &Self {
        self.put_value(key, Value::from(value))
    }

    /// Add `value` to the multi-valued entry under `key`.
    ///
    /// The first append creates an unordered set, so repeated appends do not
    /// promise replay order. Appending to a structured value that is neither
    /// a set nor a list is a no-op.
    pub fn append(&self, key: impl Into<String>, value: impl Into<String>) -> &Self {
        let mut objects = self.object_params.write();
        let entry = objects.entry(key.into()).or_insert_with(Value::empty_set);
        entry.insert(Value::Str(value.into()));
        self
    }

    /// Remove `key` from all four mappings.
    pub fn remove(&self, key: &str) -> &Self {
        self.url_params.write().shift_remove(key);
        self.stream_params.write().shift_remove(key);
        self.file_params.write().shift_remove(key);
        self.object_params.write().shift_remove(key);
        self
    }

    /// Whether any mapping holds an entry for `key`.
    pub fn has(&self, key: &str) -> bool {
        self.url_params.read().contains_key(key)
            || self.stream_params.read().contains_key(key)
            || self.file_params.read().contains_key(key)
            || self.object_params.read().contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.url_params.read().is_empty()
            && self.stream_params.read().is_empty()
            && self.file_params.read().is_empty()
            && self.object_params.read().is_empty()
    }

    /// Whether a body built now would be multipart (or carry binary JSON parts).
    pub fn has_binary_parts(&self) -> bool {
        !self.stream_params.read().is_empty() || !self.file_params.read().is_empty()
    }

    /// Charset label used for form encoding. Validated when a body is built.
    pub fn set_content_encoding(&self, label: impl Into<String>) -> &Self {
        self.settings.write().content_encoding = label.into();
        self
    }

    pub fn content_encoding(&self) -> String {
        self.settings.read().content_encoding.clone()
    }

    pub fn set_repeatable(&self, repeatable: bool) -> &Self {
        self.settings.write().repeatable = repeatable;
        self
    }

    pub fn is_repeatable(&self) -> bool {
        self.settings.read().repeatable
    }

    pub fn set_use_json_streamer(&self, enabled: bool) -> &Self {
        self.settings.write().use_json_streamer = enabled;
        self
    }

    pub fn uses_json_streamer(&self) -> bool {
        self.settings.read().use_json_streamer
    }

    /// Default auto-close flag for streams added after this call.
    pub fn set_auto_close_streams(&self, auto_close: bool) -> &Self {
        self.settings.write().auto_close_streams = auto_close;
        self
    }

    /// Plain strings followed by flattened structured values.
    pub fn param_pairs(&self) -> Vec<(String, String)> {
        self.snapshot().flat_pairs()
    }

    /// The form-encoded query string for the string and structured parameters.
    pub fn param_string(&self) -> Result<String, ClientError> {
        let snapshot = self.snapshot();
        let encoding = entity::resolve_encoding(&snapshot.content_encoding)?;
        Ok(entity::form_encode(&snapshot.flat_pairs(), encoding))
    }

    /// The query string without percent-encoding, `k=v` pairs joined by `&`.
    pub fn raw_param_string(&self) -> String {
        self.param_pairs()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Build the body entity using the container's own JSON-streamer setting.
    pub fn entity(&self) -> Result<Entity, ClientError> {
        entity::build(self, self.uses_json_streamer())
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        let settings = self.settings.read().clone();
        Snapshot {
            url_params: self.url_params.read().clone(),
            stream_params: self.stream_params.read().clone(),
            file_params: self.file_params.read().clone(),
            object_params: self.object_params.read().clone(),
            content_encoding: settings.content_encoding,
            repeatable: settings.repeatable,
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RequestParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

/// Debug rendering: `k=v` for strings, `k=STREAM`, `k=FILE`, then the
/// flattened structured pairs. Nothing is percent-encoded.
impl fmt::Display for RequestParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        let mut parts: Vec<String> = Vec::new();
        parts.extend(snapshot.url_params.iter().map(|(k, v)| format!("{k}={v}")));
        parts.extend(snapshot.stream_params.keys().map(|k| format!("{k}=STREAM")));
        parts.extend(snapshot.file_params.keys().map(|k| format!("{k}=FILE")));
        parts.extend(
            flatten_all(snapshot.object_params.iter().map(|(k, v)| (k.as_str(), v)))
                .into_iter()
                .map(|(k, v)| format!("{k}={v}")),
        );
        f.write_str(&parts.join("&"))
    }
}

impl fmt::Debug for RequestParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestParams")
            .field("params", &self.to_string())
            .field("settings", &*self.settings.read())
            .finish()
    }
}
