//! # IPC Layer
//!
//! Socket protocol to the external reward calculator engine.
//!
//! ```text
//! callers ──► IpcHandle ──(invoke / query lanes)──► IpcEventLoop
//!                                                     │  CorrelationQueue
//!                                                     ▼
//!                                        Transport (send loop / recv loop)
//!                                                     │  codec + unpacker
//!                                                     ▼
//!                                               Unix socket ◄── engine
//! ```

pub mod codec;
pub mod event_loop;
pub mod message;
pub mod queue;
pub mod transport;
pub mod unpacker;

pub use event_loop::{IpcEventLoop, IpcHandle, Lane, QueueSnapshot, Submitted};
pub use message::{
    Envelope, IncomingMessage, MessageKind, Notification, OutgoingRequest, Request, Response,
};
pub use queue::{CallResult, CompletionHandle, CorrelationQueue};
pub use unpacker::{IncomingUnpacker, MessageUnpacker, RequestUnpacker};
