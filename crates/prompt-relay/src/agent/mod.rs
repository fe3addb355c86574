//! Chat-turn runtime: the [`Orchestrator`] and its supporting modules.
//!
//! - [`orchestrator::Orchestrator`]: one chat turn from prompt to output
//!   segments, plus the connection test and background housekeeping.
//!   Start here.
//! - [`session`]: per-conversation [`Session`]s with a 24-hour idle TTL.
//! - [`output`]: [`OutputSegment`] values and their Markdown rendering.
//! - [`events`]: [`EventHandler`] trait and [`RelayEvent`] enum for
//!   observing requests. Includes [`LoggingHandler`],
//!   [`CompositeEventHandler`], and [`FnEventHandler`].

pub mod events;
pub mod orchestrator;
pub mod output;
pub mod session;

// Re-export commonly used items at the module level.
pub use events::{
    CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler, RelayEvent,
};
pub use orchestrator::{ConnectionStatus, ConversationContext, Orchestrator};
pub use output::{MAX_DISPLAYED_SUGGESTIONS, OutputSegment, render_segments};
pub use session::{Session, SessionStore};
