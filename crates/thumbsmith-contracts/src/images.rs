use std::fmt;
use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

pub const MAX_IMAGES_PER_CATEGORY: usize = 3;
pub const MAX_IMAGE_BYTES: u64 = 4 * 1024 * 1024;
pub const SUPPORTED_MIME_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/webp"];

const DATA_URI_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64,";

/// An image carried by value as `data:<mime>;base64,<payload>`.
///
/// Construction always validates the payload, so every value can be turned
/// back into its MIME type and raw bytes. Serializes as the data URI string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InlineImage {
    mime_type: String,
    payload: String,
}

impl InlineImage {
    pub fn from_bytes(mime_type: &str, bytes: &[u8]) -> Result<Self> {
        validate_mime(mime_type)?;
        Ok(Self {
            mime_type: mime_type.to_string(),
            payload: BASE64.encode(bytes),
        })
    }

    pub fn from_base64(mime_type: &str, payload: &str) -> Result<Self> {
        validate_mime(mime_type)?;
        validate_payload(payload)?;
        Ok(Self {
            mime_type: mime_type.to_string(),
            payload: payload.to_string(),
        })
    }

    /// Parses `data:image/<subtype>;base64,<payload>`. The MIME type ends at
    /// the first `;base64,` marker.
    pub fn parse(data_uri: &str) -> Result<Self> {
        let Some(rest) = data_uri.strip_prefix(DATA_URI_PREFIX) else {
            bail!("not a data URI");
        };
        let Some((mime_type, payload)) = rest.split_once(BASE64_MARKER) else {
            bail!("data URI is not base64 encoded");
        };
        Self::from_base64(mime_type, payload)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn base64_payload(&self) -> &str {
        &self.payload
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(self.payload.as_bytes())
            .context("inline image payload is not valid base64")
    }

    pub fn to_data_uri(&self) -> String {
        format!(
            "{DATA_URI_PREFIX}{}{BASE64_MARKER}{}",
            self.mime_type, self.payload
        )
    }

    /// File extension matching the MIME subtype, used when saving to disk.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

impl fmt::Display for InlineImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_data_uri())
    }
}

impl TryFrom<String> for InlineImage {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<InlineImage> for String {
    fn from(value: InlineImage) -> Self {
        value.to_data_uri()
    }
}

fn validate_mime(mime_type: &str) -> Result<()> {
    let Some(subtype) = mime_type.strip_prefix("image/") else {
        bail!("unsupported inline MIME type '{mime_type}'");
    };
    if subtype.is_empty() || mime_type.contains(['\n', '\r']) {
        bail!("malformed inline MIME type '{mime_type}'");
    }
    Ok(())
}

fn validate_payload(payload: &str) -> Result<()> {
    if payload.contains(['\n', '\r']) {
        bail!("inline image payload contains line breaks");
    }
    BASE64
        .decode(payload.as_bytes())
        .context("inline image payload is not valid base64")?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageCategory {
    StyleReference,
    CustomElement,
}

impl ImageCategory {
    pub fn label(self) -> &'static str {
        match self {
            Self::StyleReference => "style reference",
            Self::CustomElement => "custom element",
        }
    }
}

/// Ordered, capacity-bounded images of one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSet {
    category: ImageCategory,
    images: Vec<InlineImage>,
}

impl ImageSet {
    pub fn new(category: ImageCategory) -> Self {
        Self {
            category,
            images: Vec::new(),
        }
    }

    pub fn category(&self) -> ImageCategory {
        self.category
    }

    pub fn images(&self) -> &[InlineImage] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn remaining_capacity(&self) -> usize {
        MAX_IMAGES_PER_CATEGORY.saturating_sub(self.images.len())
    }

    pub fn is_full(&self) -> bool {
        self.remaining_capacity() == 0
    }

    /// Appends a whole decoded batch in one step. Anything beyond the
    /// remaining capacity is dropped; returns how many were kept.
    pub fn append_batch(&mut self, batch: Vec<InlineImage>) -> usize {
        let keep = batch.len().min(self.remaining_capacity());
        self.images.extend(batch.into_iter().take(keep));
        keep
    }

    /// Removes by position against the current length; the list stays compact.
    pub fn remove(&mut self, index: usize) -> Option<InlineImage> {
        if index >= self.images.len() {
            return None;
        }
        Some(self.images.remove(index))
    }
}

pub fn is_supported_mime(mime_type: &str) -> bool {
    SUPPORTED_MIME_TYPES.contains(&mime_type)
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}
