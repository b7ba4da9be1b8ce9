//! FESTA chat client library: block extraction, local threads, the resumable
//! socket session and the conversation controller driving them.
//! Used by the `festa` terminal binary.

pub mod api;
pub mod blocks;
pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod controller;
pub mod identity;
pub mod messages;
pub mod models;
pub mod render;
pub mod storage;
pub mod thread;
pub mod thread_store;

pub use api::{ApiClient, ApiError, UploadReceipt};
pub use blocks::{extract, Block};
pub use client::{run, ClientError};
pub use command::{parse_line, Command};
pub use config::{default_config_path, Config, ConfigError};
pub use connection::{ConnectionManager, ConnectionState, RetryPolicy};
pub use controller::{ConversationController, Effect, Event, Submission, TransportEvent};
pub use identity::ConnectionIdentity;
pub use models::{ModelCatalog, ModelInfo};
pub use render::{ConnectionStatus, HtmlTranscript, Renderer};
pub use storage::{FileStore, KeyValueStore, MemoryStore, SharedStore, StoreError};
pub use thread::{Content, Message, Role, Thread, ThreadId};
pub use thread_store::ThreadStore;
