//! Typed message pipeline.
//!
//! Turns framed packets into typed application messages and back:
//! - `message`: the wire-message trait and id space
//! - `registry`: id-to-factory table for parsing payloads
//! - `queue`: FIFO of parsed messages awaiting dispatch
//! - `dispatcher`: id-indexed handler table invoked on the loop thread
//! - `serializer`: typed message to framed send chunk

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod dispatcher;
pub mod error;
pub mod message;
pub mod queue;
pub mod registry;
pub mod serializer;

pub use dispatcher::MessageDispatcher;
pub use error::ProtoError;
pub use message::{MessageId, WireMessage};
pub use queue::{MessageEntry, MessageQueue};
pub use registry::{BoxedMessage, MessageRegistry};
pub use serializer::MessageSerializer;
