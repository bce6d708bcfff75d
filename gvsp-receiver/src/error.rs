/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Controller-facing error type.
//!
//! Protocol-level rejections (malformed or unsupported packets, dropped
//! frames) never reach here — they are always soft, logged via
//! `tracing::warn!` from inside the receive loop and never surfaced to a
//! caller. See [`crate::receive::PacketReject`] for that internal-only
//! taxonomy.

use std::io;

/// Errors returned by [`crate::Session`]'s controller operations.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The OS denied a socket operation (bind, send).
    #[error("permission denied: {0}")]
    Permission(#[from] io::Error),

    /// The socket doesn't exist, already exists, or is in the wrong
    /// receive state for the requested operation.
    #[error("{0}")]
    Connection(&'static str),

    /// A session resource (buffer) doesn't exist, or already exists, for
    /// the requested operation.
    #[error("{0}")]
    Resource(&'static str),

    /// The caller supplied a buffer or packet size that isn't valid.
    #[error("invalid value: {0}")]
    Value(&'static str),
}

/// Convenience alias for [`ControlError`]-returning controller operations.
pub type ControlResult<T> = Result<T, ControlError>;
