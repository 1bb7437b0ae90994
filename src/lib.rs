//! Streaming chat-completion client core.
//!
//! [`worker::RequestWorker`] runs HTTP requests on a dedicated thread and
//! reports [`record::OutputRecord`]s back through a channel;
//! [`parser::StreamParser`] turns response bytes into those records.

pub mod api;
pub mod commands;
pub mod config;
pub mod console;
pub mod logging;
pub mod parser;
pub mod record;
pub mod worker;

pub use config::Config;
pub use parser::{ResponseMode, StreamParser};
pub use record::{Failure, OutputRecord, RecordStatus, STOPPED_MESSAGE};
pub use worker::{RequestWorker, WorkerEvent, WorkerHandle};
