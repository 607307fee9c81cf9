//! Application payload carried by request and payload frames.

use bytes::Bytes;

/// Data plus optional metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub data: Bytes,
    pub metadata: Option<Bytes>,
}

impl Payload {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            metadata: None,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, metadata: impl Into<Bytes>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    pub fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }

    /// Returns the data as UTF-8 text, if valid.
    pub fn data_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// Returns the metadata as UTF-8 text, if present and valid.
    pub fn metadata_utf8(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| std::str::from_utf8(m).ok())
    }

    /// Combined length of data and metadata.
    pub fn len(&self) -> usize {
        self.data.len() + self.metadata.as_ref().map_or(0, Bytes::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&'static str> for Payload {
    fn from(data: &'static str) -> Self {
        Self::new(Bytes::from_static(data.as_bytes()))
    }
}

impl From<String> for Payload {
    fn from(data: String) -> Self {
        Self::new(Bytes::from(data))
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}
