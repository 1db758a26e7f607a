// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Counters and extrema for packets/bytes/timeouts (spec.md §2, §4.2, §4.5).
// Each scalar updates in isolation via plain atomics — §5 explicitly allows
// non-linearizable cross-field reads, so there is no lock here, mirroring
// how `Route::recv_count()` exposes a single atomic elsewhere in this crate.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// A point-in-time read of a channel's counters, returned by
/// [`crate::RpcChannel::stats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors_sent: u64,
    pub errors_received: u64,
    pub packets_written: u64,
    pub packets_read: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub timeouts: u64,
    pub discarded_responses: u64,
    pub last_discarded_response_id: u64,
    pub max_write_wait_ticks: u64,
    pub min_packet_size: u32,
    pub max_packet_size: u32,
}

#[derive(Default)]
pub(crate) struct Stats {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    requests_sent: AtomicU64,
    responses_received: AtomicU64,
    errors_sent: AtomicU64,
    errors_received: AtomicU64,
    packets_written: AtomicU64,
    packets_read: AtomicU64,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
    timeouts: AtomicU64,
    discarded_responses: AtomicU64,
    last_discarded_response_id: AtomicU64,
    max_write_wait_ticks: AtomicU64,
    min_packet_size: AtomicU32,
    max_packet_size: AtomicU32,
}

fn raise_max_u64(cell: &AtomicU64, value: u64) {
    let mut cur = cell.load(Ordering::Relaxed);
    while value > cur {
        match cell.compare_exchange_weak(cur, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(observed) => cur = observed,
        }
    }
}

fn raise_max_u32(cell: &AtomicU32, value: u32) {
    let mut cur = cell.load(Ordering::Relaxed);
    while value > cur {
        match cell.compare_exchange_weak(cur, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(observed) => cur = observed,
        }
    }
}

fn lower_min_u32(cell: &AtomicU32, value: u32) {
    let mut cur = cell.load(Ordering::Relaxed);
    while value < cur || cur == 0 {
        match cell.compare_exchange_weak(cur, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(observed) => cur = observed,
        }
    }
}

impl Stats {
    pub(crate) fn record_packet_written(&self, packet_bytes: usize, wait_ticks_ms: u64) {
        self.packets_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(packet_bytes as u64, Ordering::Relaxed);
        raise_max_u32(&self.max_packet_size, packet_bytes as u32);
        lower_min_u32(&self.min_packet_size, packet_bytes as u32);
        raise_max_u64(&self.max_write_wait_ticks, wait_ticks_ms);
    }

    pub(crate) fn record_packet_read(&self, packet_bytes: usize) {
        self.packets_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read
            .fetch_add(packet_bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_message_sent(&self, is_request: bool, is_error: bool) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        if is_request {
            self.requests_sent.fetch_add(1, Ordering::Relaxed);
        } else if is_error {
            self.errors_sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_message_received(&self, is_response: bool, is_error: bool) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        if is_response {
            self.responses_received.fetch_add(1, Ordering::Relaxed);
        } else if is_error {
            self.errors_received.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded_response(&self, response_id: u64) {
        self.discarded_responses.fetch_add(1, Ordering::Relaxed);
        self.last_discarded_response_id
            .store(response_id, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            errors_sent: self.errors_sent.load(Ordering::Relaxed),
            errors_received: self.errors_received.load(Ordering::Relaxed),
            packets_written: self.packets_written.load(Ordering::Relaxed),
            packets_read: self.packets_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            discarded_responses: self.discarded_responses.load(Ordering::Relaxed),
            last_discarded_response_id: self.last_discarded_response_id.load(Ordering::Relaxed),
            max_write_wait_ticks: self.max_write_wait_ticks.load(Ordering::Relaxed),
            min_packet_size: self.min_packet_size.load(Ordering::Relaxed),
            max_packet_size: self.max_packet_size.load(Ordering::Relaxed),
        }
    }
}
