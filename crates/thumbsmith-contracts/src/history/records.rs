use chrono::Local;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::images::InlineImage;

pub const PROMPT_HISTORY_KEY: &str = "promptHistory";
pub const IMAGE_HISTORY_KEY: &str = "imageHistory";

pub trait HistoryRecord: Clone + Serialize + DeserializeOwned + Send {
    /// Storage key holding the serialized list for this record kind.
    const STORAGE_KEY: &'static str;

    fn id(&self) -> u64;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRecord {
    pub id: u64,
    pub prompt: String,
    pub topic: String,
    #[serde(default)]
    pub custom_elements_images: Vec<InlineImage>,
    #[serde(default)]
    pub reference_images: Vec<InlineImage>,
    pub timestamp: String,
}

impl HistoryRecord for PromptRecord {
    const STORAGE_KEY: &'static str = PROMPT_HISTORY_KEY;

    fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: u64,
    pub prompt: String,
    pub image_src: InlineImage,
    #[serde(default)]
    pub reference_images: Vec<InlineImage>,
    #[serde(default)]
    pub custom_elements_images: Vec<InlineImage>,
    pub timestamp: String,
}

impl HistoryRecord for ImageRecord {
    const STORAGE_KEY: &'static str = IMAGE_HISTORY_KEY;

    fn id(&self) -> u64 {
        self.id
    }
}

/// Local wall-clock time formatted like `10/16/2026, 3:04:05 PM`.
pub fn human_timestamp() -> String {
    Local::now().format("%-m/%-d/%Y, %-I:%M:%S %p").to_string()
}
