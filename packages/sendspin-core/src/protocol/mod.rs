//! Wire protocol: JSON control messages and the binary media frame codec.

pub mod binary;
pub mod messages;

pub use binary::{BinaryKind, BinaryMessage};
pub use messages::Message;
