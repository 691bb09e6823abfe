use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::io::AsyncRead;

/// Lifecycle stage of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Freshly received, untrusted content
    Quarantine,
    /// Accepted content
    Perm,
    /// Rejected content
    Reject,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Quarantine, Stage::Perm, Stage::Reject];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Quarantine => "quarantine",
            Stage::Perm => "perm",
            Stage::Reject => "reject",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quarantine" => Ok(Stage::Quarantine),
            "perm" => Ok(Stage::Perm),
            "reject" => Ok(Stage::Reject),
            other => Err(format!(
                "unknown stage '{}', expected quarantine, perm or reject",
                other
            )),
        }
    }
}

/// One value per stage, e.g. the three directories or bucket names a backend
/// is configured with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLocations<T> {
    pub quarantine: T,
    pub perm: T,
    pub reject: T,
}

impl<T> StageLocations<T> {
    pub fn new(quarantine: T, perm: T, reject: T) -> Self {
        Self {
            quarantine,
            perm,
            reject,
        }
    }

    pub fn get(&self, stage: Stage) -> &T {
        match stage {
            Stage::Quarantine => &self.quarantine,
            Stage::Perm => &self.perm,
            Stage::Reject => &self.reject,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stage, &T)> {
        Stage::ALL.into_iter().map(move |stage| (stage, self.get(stage)))
    }

}

/// Where an artifact physically lives after a write or copy.
///
/// `uri` is a filesystem path for the local backend and a URL-shaped
/// `{endpoint}/{bucket}/{key}` string for the object store. The key is always
/// the last segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub stage: Stage,
    pub key: String,
    pub uri: String,
}

impl Location {
    pub fn new(stage: Stage, key: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            stage,
            key: key.into(),
            uri: uri.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn as_str(&self) -> &str {
        &self.uri
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// Characters left as-is when a key is placed in a URL path segment.
pub const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encodes a key for use as one URL path segment.
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}

/// Extracts the key from a raw location descriptor of either backend,
/// ignoring any query string and undoing URL encoding.
///
/// Keys never contain `?`, `#` or `%`, so decoding a filesystem path is a no-op.
pub fn key_segment(uri: &str) -> Cow<'_, str> {
    let without_query = uri.split(['?', '#']).next().unwrap_or(uri);
    let segment = without_query
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(without_query);
    percent_decode_str(segment).decode_utf8_lossy()
}

/// Metadata returned by a successful existence query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactMetadata {
    pub content_length: u64,
    /// HTTP-equivalent status: always 200 for the local backend, mirrored from
    /// the remote store otherwise.
    pub status_code: u16,
    pub last_modified: Option<DateTime<Utc>>,
    pub e_tag: Option<String>,
}

/// Outcome of `ls`. Transport problems travel on the error channel instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "presence", rename_all = "lowercase")]
pub enum Presence {
    Found(ArtifactMetadata),
    Absent,
}

impl Presence {
    pub fn is_found(&self) -> bool {
        matches!(self, Presence::Found(_))
    }

    pub fn metadata(&self) -> Option<&ArtifactMetadata> {
        match self {
            Presence::Found(meta) => Some(meta),
            Presence::Absent => None,
        }
    }
}

/// Bytes handed to `write`.
pub enum Content {
    Bytes(Bytes),
    File(PathBuf),
    Stream {
        reader: Box<dyn AsyncRead + Unpin + Send>,
        len: Option<u64>,
    },
}

impl Content {
    pub fn stream(reader: impl AsyncRead + Unpin + Send + 'static, len: Option<u64>) -> Self {
        Content::Stream {
            reader: Box::new(reader),
            len,
        }
    }

    /// Length known up front without touching the filesystem.
    pub fn len_hint(&self) -> Option<u64> {
        match self {
            Content::Bytes(b) => Some(b.len() as u64),
            Content::File(_) => None,
            Content::Stream { len, .. } => *len,
        }
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Content::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Content::File(path) => f.debug_tuple("File").field(path).finish(),
            Content::Stream { len, .. } => f.debug_struct("Stream").field("len", len).finish(),
        }
    }
}

impl From<Bytes> for Content {
    fn from(value: Bytes) -> Self {
        Content::Bytes(value)
    }
}

impl From<Vec<u8>> for Content {
    fn from(value: Vec<u8>) -> Self {
        Content::Bytes(Bytes::from(value))
    }
}

impl From<String> for Content {
    fn from(value: String) -> Self {
        Content::Bytes(Bytes::from(value))
    }
}

impl From<&'static str> for Content {
    fn from(value: &'static str) -> Self {
        Content::Bytes(Bytes::from_static(value.as_bytes()))
    }
}

impl From<PathBuf> for Content {
    fn from(value: PathBuf) -> Self {
        Content::File(value)
    }
}
