//! Document references: content-addresses plus descriptive metadata.
//!
//! The kernel never sees document bytes. It stores the address an external
//! content-addressed store handed back and checks only its shape.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::ValidationError;
use crate::types::IdentityRef;

/// Shortest accepted content address.
pub const MIN_CONTENT_ADDRESS_LEN: usize = 8;

/// Longest accepted content address.
pub const MAX_CONTENT_ADDRESS_LEN: usize = 128;

/// Longest accepted document name.
pub const MAX_DOCUMENT_NAME_LEN: usize = 255;

/// An opaque content address (CID or hex digest).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentAddress(String);

impl ContentAddress {
    /// Parse a content address. Only the alphabet and length are checked.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        if raw.len() < MIN_CONTENT_ADDRESS_LEN || raw.len() > MAX_CONTENT_ADDRESS_LEN {
            return Err(ValidationError::InvalidContentAddress(format!(
                "length {} outside {}..={}",
                raw.len(),
                MIN_CONTENT_ADDRESS_LEN,
                MAX_CONTENT_ADDRESS_LEN
            )));
        }
        if !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ValidationError::InvalidContentAddress(format!(
                "{raw} contains non-alphanumeric characters"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentAddress({})", self.0)
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ContentAddress> for String {
    fn from(addr: ContentAddress) -> Self {
        addr.0
    }
}

impl TryFrom<String> for ContentAddress {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

/// A reference to a document held in the external store. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRef {
    pub content_address: ContentAddress,
    pub name: String,
    pub media_type: String,
    pub size: u64,
}

impl DocumentRef {
    pub fn new(
        content_address: ContentAddress,
        name: impl Into<String>,
        media_type: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            content_address,
            name: name.into(),
            media_type: media_type.into(),
            size,
        }
    }
}

/// A document registered to an owner in the document registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub owner: IdentityRef,
    pub document: DocumentRef,
    /// When the document was registered (Unix ms).
    pub registered_at: i64,
}

/// Limits applied to document references before they may be granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPolicy {
    /// Largest accepted document, in bytes.
    pub max_size_bytes: u64,
    /// Accepted media types, lowercase.
    pub allowed_media_types: Vec<String>,
    /// Maximum number of documents in one grant.
    pub max_documents_per_grant: usize,
}

impl Default for DocumentPolicy {
    fn default() -> Self {
        Self {
            max_size_bytes: 10 * 1024 * 1024,
            allowed_media_types: vec![
                "application/pdf".into(),
                "image/jpeg".into(),
                "image/jpg".into(),
                "image/png".into(),
            ],
            max_documents_per_grant: 16,
        }
    }
}

impl DocumentPolicy {
    /// A policy that accepts any well-formed media type.
    pub fn permissive() -> Self {
        Self {
            allowed_media_types: Vec::new(),
            ..Self::default()
        }
    }

    /// Validate one document reference. An empty allow-list accepts any
    /// well-formed media type.
    pub fn validate_document(&self, doc: &DocumentRef) -> Result<(), ValidationError> {
        let name = doc.name.trim();
        if name.is_empty() {
            return Err(ValidationError::InvalidDocumentName("name is empty".into()));
        }
        if name.chars().count() > MAX_DOCUMENT_NAME_LEN {
            return Err(ValidationError::InvalidDocumentName(format!(
                "name exceeds {} characters",
                MAX_DOCUMENT_NAME_LEN
            )));
        }

        let media_type = normalize_media_type(&doc.media_type)?;
        if !self.allowed_media_types.is_empty()
            && !self.allowed_media_types.iter().any(|m| *m == media_type)
        {
            return Err(ValidationError::MediaTypeNotAllowed(media_type));
        }

        if doc.size == 0 || doc.size > self.max_size_bytes {
            return Err(ValidationError::InvalidDocumentSize {
                size: doc.size,
                max: self.max_size_bytes,
            });
        }

        Ok(())
    }

    /// Validate the document list of a grant: non-empty, bounded, no
    /// repeated addresses, every entry valid.
    pub fn validate_grant_documents(&self, docs: &[DocumentRef]) -> Result<(), ValidationError> {
        if docs.is_empty() {
            return Err(ValidationError::NoDocuments);
        }
        if docs.len() > self.max_documents_per_grant {
            return Err(ValidationError::TooManyDocuments {
                count: docs.len(),
                max: self.max_documents_per_grant,
            });
        }

        let mut seen = HashSet::new();
        for doc in docs {
            if !seen.insert(&doc.content_address) {
                return Err(ValidationError::DuplicateDocument(
                    doc.content_address.to_string(),
                ));
            }
            self.validate_document(doc)?;
        }
        Ok(())
    }
}

/// Lowercase a media type and check it has the `type/subtype` shape.
/// Parameters such as `; charset=utf-8` are dropped.
pub fn normalize_media_type(raw: &str) -> Result<String, ValidationError> {
    let essence = raw.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    let mut parts = essence.splitn(2, '/');
    let (Some(kind), Some(subtype)) = (parts.next(), parts.next()) else {
        return Err(ValidationError::InvalidMediaType(raw.to_string()));
    };
    let token = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.'))
    };
    if !token(kind) || !token(subtype) {
        return Err(ValidationError::InvalidMediaType(raw.to_string()));
    }
    Ok(essence)
}
