//! Streaming Infrastructure
//!
//! Everything a single generation needs while it is in flight.
//!
//! ```text
//!  StreamOrchestrator
//!        │ set / cancel / remove_if
//!        ▼
//!  CancellationRegistry ── session ──► GenerationHandle
//!                                        │ state lock
//!                                        │ deliver / complete / fail / cancel
//!                                        ▼
//!                                   DeliveryChannel ──► client
//! ```
//!
//! - [`GenerationHandle`]: token, state and buffer of one generation
//! - [`CancellationRegistry`]: at most one active handle per session
//! - [`DeliveryChannel`]: abstract push sink, [`ChannelDelivery`] over mpsc
//! - [`FallbackResponder`]: canned answers streamed without a backend

mod delivery;
mod fallback;
mod handle;
mod registry;

pub use delivery::{ChannelDelivery, DeliveryChannel};
pub use fallback::{split_lines, CannedAnswer, FallbackResponder, DEFAULT_CHUNK_DELAY};
pub use handle::{GenerationHandle, GenerationState};
pub use registry::CancellationRegistry;
