pub mod config;
pub mod logging;

pub mod downloader;
pub mod error;
pub mod history;
pub mod normalize;
pub mod queue;
pub mod storage;
pub mod store;
pub mod sweep;
pub mod sync;
