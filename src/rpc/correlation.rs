// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The two correlation maps from spec.md §3/§4.4: pending-requests (outbound
// calls awaiting a response) and incoming-requests (inbound reassembly).
// Both need concurrent insert/lookup/remove, so both are `DashMap`s, the
// way the rest of this workspace reaches for `dashmap` wherever cpp-ipc's
// C++ side would reach for a `std::unordered_map` behind a lock.
//
// The wait-slot backing a pending request is purely local to this process —
// it is observed only by the caller thread that issued the request and
// completed only by this peer's own reader thread or its own timeout timer,
// so it is a plain `std::sync::{Mutex, Condvar}` pair, not a cross-process
// primitive. `Waiter`/`IpcCondition` are reserved for signalling across the
// shared-memory ring; see `rpc::ring`.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// The outcome of a `remote_request`/`remote_request_async` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcResponse {
    pub success: bool,
    pub data: Option<Vec<u8>>,
}

impl RpcResponse {
    pub(crate) fn ok(data: Option<Vec<u8>>) -> Self {
        Self { success: true, data }
    }

    pub(crate) fn fail() -> Self {
        Self { success: false, data: None }
    }
}

/// One in-flight outbound request. Lives in `pending-requests` from the
/// moment the sender decides to send until either a matching response
/// arrives or the request times out (spec.md §4.4 invariant 2).
pub(crate) struct PendingRequest {
    pub(crate) msg_id: u64,
    pub(crate) created_at: Instant,
    /// Reassembly scratch space for a multi-packet response. Only ever
    /// touched by this peer's own reader thread.
    pub(crate) partial: Mutex<Option<Vec<u8>>>,
    slot: Mutex<Option<RpcResponse>>,
    cv: Condvar,
}

impl PendingRequest {
    pub(crate) fn new(msg_id: u64) -> Self {
        Self {
            msg_id,
            created_at: Instant::now(),
            partial: Mutex::new(None),
            slot: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    /// Complete the wait-slot, but only if nobody has completed it yet.
    /// Returns `true` if this call was the one that set the final value —
    /// whichever of "response arrived" or "timeout fired" gets there first
    /// owns the side effects (stats, map removal).
    pub(crate) fn try_complete(&self, response: RpcResponse) -> bool {
        let mut guard = self.slot.lock().unwrap();
        if guard.is_some() {
            return false;
        }
        *guard = Some(response);
        self.cv.notify_all();
        true
    }

    /// Block until the slot is completed or `timeout` elapses. `None` means
    /// wait forever. A caller-side timeout here does not count towards the
    /// statistics timeout counter — only the request's own timer thread
    /// (armed in `RpcChannel::remote_request_async`) increments that.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> RpcResponse {
        let mut guard = self.slot.lock().unwrap();
        match timeout {
            None => {
                while guard.is_none() {
                    guard = self.cv.wait(guard).unwrap();
                }
            }
            Some(d) => {
                let deadline = Instant::now() + d;
                while guard.is_none() {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    let (g, _) = self.cv.wait_timeout(guard, remaining).unwrap();
                    guard = g;
                }
            }
        }
        guard.clone().unwrap_or(RpcResponse { success: false, data: None })
    }
}

/// One partially-reassembled inbound request. Lazily created on the first
/// packet of a `msg_id`, removed on its terminal packet (spec.md §3).
pub(crate) struct InboundPartial {
    pub(crate) buf: Vec<u8>,
    pub(crate) total_packets: u16,
}

impl InboundPartial {
    pub(crate) fn new(payload_size: u32, total_packets: u16) -> Self {
        Self {
            buf: vec![0u8; payload_size as usize],
            total_packets,
        }
    }
}

/// The two concurrent maps keyed by `msg_id` (spec.md §3/§4.4).
#[derive(Default)]
pub(crate) struct CorrelationTables {
    pub(crate) pending: DashMap<u64, std::sync::Arc<PendingRequest>>,
    pub(crate) incoming: DashMap<u64, InboundPartial>,
}

impl CorrelationTables {
    pub(crate) fn new() -> Self {
        Self {
            pending: DashMap::new(),
            incoming: DashMap::new(),
        }
    }
}
