#![deny(missing_docs)]
//! # tkvs
//! A multi-threaded, networked, in-memory key-value store organized into
//! named tables, with per-client operand stacks and explicit multi-table
//! transactions.
//!
//! Clients speak a line-oriented text protocol: after a `LOGIN` they issue
//! stack-oriented commands (`PUSH`, `POP`, `TOP`, arithmetic) and table
//! commands (`CREATE`, `SET`, `GET`), either in autocommit mode, where each
//! mutation is its own atomic unit, or inside a `BEGIN`/`COMMIT`
//! transaction that locks every touched table and commits or rolls back
//! all changes together. Transactions acquire table locks without waiting,
//! so contending transactions fail fast instead of deadlocking, and
//! tentative changes are never visible to other clients before commit.

pub use crate::client::TkvsClient;
pub use crate::error::{Result, TkvsError};
pub use crate::message::{Message, MessageType};
pub use crate::registry::Registry;
pub use crate::server::TkvsServer;
pub use crate::session::Session;
pub use crate::table::{Table, TableData, TableGuard};
pub use crate::value_stack::ValueStack;

mod client;
pub mod codec;
mod error;
mod message;
mod registry;
mod server;
mod session;
mod table;
pub mod thread_pool;
mod value_stack;
