//! Mail and the packets that carry it.

pub mod message;
pub mod packet;

pub use message::{Message, MessageKind, Payload};
pub use packet::{DEFAULT_MAX_PACKET_SIZE, FrameError, PacketCodec};
