pub mod events;
pub mod history;
pub mod images;
pub mod models;
