//! Synchronized multi-receiver audio broadcasting core.
//!
//! A logical playback group (a [`channel::ChannelHandle`]) drives one or more
//! network-attached speakers ([`receiver::Receiver`]) so that every
//! receiver emits the same audio sample at the same wall-clock instant,
//! despite variable network delay and independent local clocks. See each
//! module for the piece of that problem it owns.
//!
//! Out of scope, treated as external collaborators: the music library and
//! metadata database, HTTP/WebSocket control APIs, track-file decoding to
//! raw PCM (see [`source_stream::SourceProvider`]), persistent state
//! storage, LAN discovery, and any UI.

pub mod broadcaster;
pub mod channel;
pub mod clock;
pub mod config;
pub mod controller;
pub mod emitter;
pub mod error;
pub mod events;
pub mod model;
pub mod receiver;
pub mod registry;
pub mod source_stream;
pub mod sync;
pub mod transport;
pub mod wire;

pub use channel::ChannelHandle;
pub use clock::MonotonicClock;
pub use config::Config;
pub use controller::Controller;
pub use error::{CoreError, CoreResult};
pub use events::{CoreEvent, EventBus};
