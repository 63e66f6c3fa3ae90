//! Centralized error types for the broadcast core.
//!
//! Structural failures (unknown ids, protocol violations, double-attach) are
//! represented here and returned to callers. Transport and source-read
//! failures are handled locally by the owning actor (see [`crate::broadcaster`]
//! and [`crate::receiver`]) and never reach this type — there is no caller
//! waiting on them.

use thiserror::Error;

use crate::model::SourceId;

/// Application-wide error type for the broadcast core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("source id not found in playlist: {0:?}")]
    UnknownSourceId(SourceId),

    #[error("receiver {0} is already attached to a channel")]
    ReceiverAlreadyAttached(uuid::Uuid),

    #[error("receiver {0} is not attached to this channel")]
    ReceiverNotFound(uuid::Uuid),

    #[error("channel is not playing")]
    ChannelNotPlaying,
}

pub type CoreResult<T> = Result<T, CoreError>;
