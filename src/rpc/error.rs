// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

use std::io;

use thiserror::Error;

/// Errors raised by public entry points on [`crate::RpcChannel`].
///
/// Timeouts, send failures, and remote handler failures are *not* part of
/// this taxonomy — they are ordinary outcomes surfaced as
/// `RpcResponse { success: false, .. }`, never as `Err`.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Raised by any public entry point once [`crate::RpcChannel::dispose`] has
    /// been requested.
    #[error("rpc channel already disposed")]
    AlreadyDisposed,

    /// Raised once the underlying ring reports `shutting_down`.
    #[error("rpc channel closed")]
    ChannelClosed,

    /// Raised at construction time for out-of-range `RpcChannelConfig` values.
    #[error("configuration value out of range: {0}")]
    OutOfRangeConfig(String),

    /// Wraps an I/O failure from the shared-memory or mutex layer.
    #[error(transparent)]
    Io(#[from] io::Error),
}
