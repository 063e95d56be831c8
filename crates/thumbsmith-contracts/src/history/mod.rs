mod records;
mod storage;
mod store;

pub use records::{
    human_timestamp, HistoryRecord, ImageRecord, PromptRecord, IMAGE_HISTORY_KEY, PROMPT_HISTORY_KEY,
};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use store::{HistoryStore, IdClock};
