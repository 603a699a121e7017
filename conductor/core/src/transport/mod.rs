//! Transport Support
//!
//! The core itself is transport-agnostic: it pushes [`ChatEvent`]s into a
//! [`DeliveryChannel`] and never touches a socket. This module holds the
//! pieces a socket transport shares with its clients:
//!
//! - [`frame`]: length-prefixed, checksummed JSON frames
//! - [`protocol`]: the request and response messages inside those frames
//!
//! [`ChatEvent`]: crate::messages::ChatEvent
//! [`DeliveryChannel`]: crate::streaming::DeliveryChannel

pub mod frame;
pub mod protocol;

pub use frame::{encode, encode_with_limit, FrameDecoder, FrameError, MAX_FRAME_SIZE};
pub use protocol::{ClientRequest, HistoryEntry, ServerFrame};
