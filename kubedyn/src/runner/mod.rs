//! Streaming runners over [`Operation`](crate::Operation) values.
//!
//! Single-shot execution lives directly on [`Client`](crate::Client)
//! (`run`, `run_text`, `run_status`, `run_stream`); this module adds the
//! lazy producers:
//!
//! - [`Client::stream`](crate::Client::stream) pages through list calls with
//!   `limit`/`continue`
//! - [`Client::watch_stream`](crate::Client::watch_stream) delivers watch
//!   events with resource-version bookkeeping and 410 recovery
//! - [`Client::connect`](crate::Client::connect) opens a channel-framed
//!   WebSocket for exec/attach
//!
//! All of them compute elements on demand: the consumer's pull rate is the
//! only back-pressure.

mod connect;
mod list;
mod watch;

pub use connect::{ChannelMessage, ConnectedProcess};
