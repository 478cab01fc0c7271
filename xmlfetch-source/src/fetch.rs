//! Getting document content for an absolute URI.

use crate::tree::PreParsed;
use fnv::FnvHashMap;
use std::io;
use thiserror::Error;
use xmlfetch_uri::AbsoluteUri;

/// Document content as handed to a parser factory.
#[derive(Debug, Clone)]
pub enum DocumentInput {
    Bytes(Vec<u8>),
    Text(String),
    /// Events from a document that has already been parsed.
    Tree(PreParsed),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("cannot read {uri}: {source}")]
    Io {
        uri: String,
        #[source]
        source: io::Error,
    },
    #[error("no fetcher for the URI scheme of {0}")]
    UnsupportedScheme(String),
    #[error("no document at {0}")]
    NotFound(String),
}

pub trait DocumentFetcher {
    fn fetch(&self, uri: &AbsoluteUri) -> Result<DocumentInput, FetchError>;
}

impl<F: DocumentFetcher + ?Sized> DocumentFetcher for &F {
    fn fetch(&self, uri: &AbsoluteUri) -> Result<DocumentInput, FetchError> {
        (**self).fetch(uri)
    }
}

impl<F: DocumentFetcher + ?Sized> DocumentFetcher for Box<F> {
    fn fetch(&self, uri: &AbsoluteUri) -> Result<DocumentInput, FetchError> {
        (**self).fetch(uri)
    }
}

/// Reads `file:` URIs from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsFetcher;

impl DocumentFetcher for FsFetcher {
    fn fetch(&self, uri: &AbsoluteUri) -> Result<DocumentInput, FetchError> {
        let path = uri
            .to_file_path()
            .ok_or_else(|| FetchError::UnsupportedScheme(uri.to_string()))?;
        tracing::debug!(path = %path.display(), "reading document");
        match std::fs::read(&path) {
            Ok(bytes) => Ok(DocumentInput::Bytes(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(uri.to_string()))
            }
            Err(source) => Err(FetchError::Io {
                uri: uri.to_string(),
                source,
            }),
        }
    }
}

/// Serves documents held in memory, keyed by their absolute URI text.
#[derive(Debug, Default, Clone)]
pub struct MemoryFetcher {
    documents: FnvHashMap<String, DocumentInput>,
}

impl MemoryFetcher {
    pub fn new() -> MemoryFetcher {
        MemoryFetcher::default()
    }

    pub fn insert(&mut self, uri: &str, text: &str) {
        self.documents
            .insert(uri.to_string(), DocumentInput::Text(text.to_string()));
    }

    pub fn with(mut self, uri: &str, text: &str) -> MemoryFetcher {
        self.insert(uri, text);
        self
    }
}

impl DocumentFetcher for MemoryFetcher {
    fn fetch(&self, uri: &AbsoluteUri) -> Result<DocumentInput, FetchError> {
        self.documents
            .get(uri.as_str())
            .cloned()
            .ok_or_else(|| FetchError::NotFound(uri.to_string()))
    }
}
