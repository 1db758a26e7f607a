// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// `RpcChannel` wires the pieces from the rest of `rpc::` into the two-peer
// request/response core described by spec.md §4: role election over a named
// shared memory segment, two single-reader `Ring`s (one per direction),
// `CorrelationTables` for matching responses to requests and reassembling
// fragmented messages, a registered `Handler` dispatched on its own worker
// thread per inbound request, and the multi-phase dispose lifecycle of
// spec.md §4.6.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::mutex::IpcMutex;
use crate::shm::ShmHandle;

use super::codec::{packet_size_for, total_packets_for, MsgType, PacketHeader, HEADER_SIZE};
use super::correlation::{CorrelationTables, InboundPartial, PendingRequest, RpcResponse};
use super::dispatcher::{Handler, Responder};
use super::error::RpcError;
use super::meta;
use super::ring::Ring;
use super::stats::{Stats, StatsSnapshot};

/// Default per-packet payload capacity if [`RpcChannelConfig`] is left at its
/// defaults: 4096-byte slots, 256 of them per direction.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;
pub const DEFAULT_BUFFER_NODE_COUNT: usize = 256;
const MIN_BUFFER_CAPACITY: usize = 256;
const MAX_BUFFER_CAPACITY: usize = 1_048_576;

/// How long a call to `remote_request`/`remote_request_async` waits for a
/// response if the caller doesn't pass an explicit timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

const ROLE_ELECTION_TIMEOUT_MS: u64 = 500;
const SIZING_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_millis(1_000);
const READ_TIMEOUT: Duration = Duration::from_millis(500);

const ALIVE: u8 = 0;
const DISPOSING: u8 = 1;
const FINISHED: u8 = 2;

/// Which end of a channel this peer ended up being, decided once at `open()`
/// time by racing for a named inter-process mutex (spec.md §4.6, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
}

/// Wire protocol version. `V1` is the only one that exists today; the field
/// is carried on [`RpcChannelConfig`] so a future version can be negotiated
/// without an API break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    #[default]
    V1,
}

/// Construction parameters for an [`crate::RpcChannel`]. `buffer_capacity` is
/// the master's choice; a slave discovers the master's value during `open()`
/// and its own setting (if any) is ignored.
pub struct RpcChannelConfig {
    name: String,
    buffer_capacity: usize,
    buffer_node_count: usize,
    protocol_version: ProtocolVersion,
    handler: Option<Handler>,
}

impl RpcChannelConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            buffer_node_count: DEFAULT_BUFFER_NODE_COUNT,
            protocol_version: ProtocolVersion::default(),
            handler: None,
        }
    }

    /// Bytes per ring slot, header included. Must fall in 256..=1,048,576.
    pub fn buffer_capacity(mut self, bytes: usize) -> Self {
        self.buffer_capacity = bytes;
        self
    }

    /// Number of slots per direction.
    pub fn buffer_node_count(mut self, count: usize) -> Self {
        self.buffer_node_count = count;
        self
    }

    /// Wire protocol version. Only `V1` exists today.
    pub fn protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    /// Register the handler invoked for each inbound `REQUEST`. Without one,
    /// every inbound request gets an `ERROR` response.
    pub fn handler(mut self, handler: Handler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Build the channel this config describes.
    pub fn open(self) -> Result<RpcChannel, RpcError> {
        RpcChannel::open(self)
    }

    fn validate(&self) -> Result<(), RpcError> {
        if !(MIN_BUFFER_CAPACITY..=MAX_BUFFER_CAPACITY).contains(&self.buffer_capacity) {
            return Err(RpcError::OutOfRangeConfig(format!(
                "buffer_capacity {} out of range {}..={}",
                self.buffer_capacity, MIN_BUFFER_CAPACITY, MAX_BUFFER_CAPACITY
            )));
        }
        if self.buffer_capacity <= HEADER_SIZE {
            return Err(RpcError::OutOfRangeConfig(format!(
                "buffer_capacity {} must exceed the {}-byte packet header",
                self.buffer_capacity, HEADER_SIZE
            )));
        }
        if self.buffer_node_count == 0 {
            return Err(RpcError::OutOfRangeConfig("buffer_node_count must be non-zero".into()));
        }
        Ok(())
    }
}

/// A handle returned by `remote_request_async`. There is no async runtime in
/// this stack, so this is a plain blocking handle rather than a `Future`:
/// call [`PendingResponse::wait`] when the result is actually needed.
pub struct PendingResponse {
    request: Arc<PendingRequest>,
}

impl PendingResponse {
    /// Block until the response arrives or this call's own timer fires. If
    /// the call was made with no timeout, blocks forever.
    pub fn wait(self) -> RpcResponse {
        self.request.wait(None)
    }
}

struct ChannelInner {
    name: String,
    role: Role,
    protocol_version: ProtocolVersion,
    msg_buffer_length: usize,
    next_msg_id: AtomicU64,
    send_lock: Mutex<()>,
    outbound: Ring,
    inbound: Ring,
    tables: CorrelationTables,
    handler: Mutex<Option<Handler>>,
    stats: Stats,
    process_count: Mutex<i64>,
    reading_in_progress: Mutex<bool>,
    needs_managed_dispose: AtomicBool,
    disposed: AtomicU8,
    election_mutex: Mutex<Option<IpcMutex>>,
    meta_shm: Mutex<Option<ShmHandle>>,
    dispose_done: Mutex<bool>,
    dispose_cv: Condvar,
}

/// A bidirectional request/response connection to exactly one other peer,
/// over two shared-memory rings (spec.md §1, §4).
pub struct RpcChannel {
    inner: Arc<ChannelInner>,
}

impl RpcChannel {
    /// Open (or join) the named channel. Blocks briefly while the two peers
    /// elect a master/slave role and, for the slave, discover the master's
    /// ring sizing.
    pub fn open(config: RpcChannelConfig) -> Result<Self, RpcError> {
        config.validate()?;
        let name = config.name;

        let election_name = format!("{name}SharedMemory_MasterMutex");
        let (role, election_mutex) = elect_role(&election_name, ROLE_ELECTION_TIMEOUT_MS)?;

        let meta_name = format!("{name}_Meta_SharedMemory_MMF");
        let (buffer_capacity, buffer_node_count, meta_shm) = match role {
            Role::Master => {
                let shm = meta::publish(&meta_name, config.buffer_capacity, config.buffer_node_count)?;
                (config.buffer_capacity, config.buffer_node_count, Some(shm))
            }
            Role::Slave => {
                let sizing = meta::discover(&meta_name, SIZING_DISCOVERY_TIMEOUT)?;
                (sizing.buffer_capacity, sizing.buffer_node_count, None)
            }
        };
        let msg_buffer_length = buffer_capacity - HEADER_SIZE;

        let master_name = format!("{name}_Master_SharedMemory_MMF");
        let slave_name = format!("{name}_Slave_SharedMemory_MMF");
        let (inbound_name, outbound_name) = match role {
            Role::Master => (master_name, slave_name),
            Role::Slave => (slave_name, master_name),
        };

        let (inbound, outbound) = match role {
            Role::Master => (
                Ring::open_or_create(&inbound_name, buffer_node_count, buffer_capacity)?,
                Ring::open_or_create(&outbound_name, buffer_node_count, buffer_capacity)?,
            ),
            Role::Slave => (
                Ring::open_existing(&inbound_name, buffer_node_count, buffer_capacity)?,
                Ring::open_existing(&outbound_name, buffer_node_count, buffer_capacity)?,
            ),
        };

        debug!(
            "rpc channel '{name}' open as {role:?}, buffer_capacity={buffer_capacity} buffer_node_count={buffer_node_count}"
        );

        let inner = Arc::new(ChannelInner {
            name,
            role,
            protocol_version: config.protocol_version,
            msg_buffer_length,
            next_msg_id: AtomicU64::new(0),
            send_lock: Mutex::new(()),
            outbound,
            inbound,
            tables: CorrelationTables::new(),
            handler: Mutex::new(config.handler),
            stats: Stats::default(),
            process_count: Mutex::new(0),
            reading_in_progress: Mutex::new(false),
            needs_managed_dispose: AtomicBool::new(false),
            disposed: AtomicU8::new(ALIVE),
            election_mutex: Mutex::new(election_mutex),
            meta_shm: Mutex::new(meta_shm),
            dispose_done: Mutex::new(false),
            dispose_cv: Condvar::new(),
        });

        ChannelInner::spawn_read_loop(Arc::clone(&inner));

        Ok(Self { inner })
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.inner.protocol_version
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Send `payload` as a `REQUEST` and block for the response. `timeout`
    /// of `None` waits forever; `Some(Duration::ZERO)` fails immediately
    /// without sending anything.
    pub fn remote_request(&self, payload: Option<&[u8]>, timeout: Option<Duration>) -> Result<RpcResponse, RpcError> {
        Ok(self.remote_request_async(payload, timeout)?.wait())
    }

    /// Like [`RpcChannel::remote_request`] but returns immediately with a
    /// handle the caller can wait on later.
    pub fn remote_request_async(
        &self,
        payload: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<PendingResponse, RpcError> {
        self.inner.check_alive()?;

        if let Some(d) = timeout {
            if d.is_zero() {
                let pending = Arc::new(PendingRequest::new(0));
                pending.try_complete(RpcResponse::fail());
                self.inner.stats.record_timeout();
                return Ok(PendingResponse { request: pending });
            }
        }

        let msg_id = self.inner.next_msg_id.fetch_add(1, Ordering::Relaxed) + 1;
        let pending = Arc::new(PendingRequest::new(msg_id));
        self.inner.tables.pending.insert(msg_id, Arc::clone(&pending));

        let data = payload.unwrap_or(&[]);
        let sent = self
            .inner
            .write_framed(MsgType::Request, msg_id, data, 0)
            .unwrap_or(false);
        if !sent {
            self.inner.tables.pending.remove(&msg_id);
            pending.try_complete(RpcResponse::fail());
            return Ok(PendingResponse { request: pending });
        }

        if let Some(d) = timeout {
            let inner = Arc::clone(&self.inner);
            let pr = Arc::clone(&pending);
            std::thread::spawn(move || {
                std::thread::sleep(d);
                if pr.try_complete(RpcResponse::fail()) {
                    inner.tables.pending.remove(&pr.msg_id);
                    inner.stats.record_timeout();
                    trace!("request msg_id={} timed out on '{}'", pr.msg_id, inner.name);
                }
            });
        }

        Ok(PendingResponse { request: pending })
    }

    /// Request shutdown. Returns immediately; if requests are still being
    /// processed, teardown happens once they finish (spec.md §4.6).
    pub fn dispose(&self) {
        self.inner.request_dispose();
    }

    /// Whether teardown has fully completed.
    pub fn dispose_finished(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst) == FINISHED
    }

    /// Block until `dispose_finished()` would return `true`, or `timeout`
    /// elapses. Returns whether teardown had finished by the time this
    /// returned.
    pub fn wait_disposed(&self, timeout: Option<Duration>) -> bool {
        let mut done = self.inner.dispose_done.lock().unwrap();
        match timeout {
            None => {
                while !*done {
                    done = self.inner.dispose_cv.wait(done).unwrap();
                }
                true
            }
            Some(d) => {
                let deadline = Instant::now() + d;
                while !*done {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    let (guard, _) = self.inner.dispose_cv.wait_timeout(done, remaining).unwrap();
                    done = guard;
                }
                *done
            }
        }
    }
}

impl ChannelInner {
    fn check_alive(&self) -> Result<(), RpcError> {
        if self.disposed.load(Ordering::SeqCst) != ALIVE {
            return Err(RpcError::AlreadyDisposed);
        }
        if self.outbound.is_shutting_down() || self.inbound.is_shutting_down() {
            return Err(RpcError::ChannelClosed);
        }
        Ok(())
    }

    /// Fragment `payload` into packets and push them through `outbound`,
    /// holding `send_lock` for the whole message so two senders in this
    /// process can't interleave one another's packets.
    fn write_framed(&self, msg_type: MsgType, msg_id: u64, payload: &[u8], response_id: u64) -> io::Result<bool> {
        if self.disposed.load(Ordering::SeqCst) != ALIVE || self.outbound.is_shutting_down() {
            return Ok(false);
        }

        let _guard = self.send_lock.lock().unwrap();

        let total_packets = total_packets_for(payload.len(), self.msg_buffer_length);
        for current_packet in 1..=total_packets {
            if self.disposed.load(Ordering::SeqCst) != ALIVE || self.outbound.is_shutting_down() {
                return Ok(false);
            }

            let offset = self.msg_buffer_length * (current_packet as usize - 1);
            let chunk_len = packet_size_for(payload.len() as u32, current_packet, total_packets, self.msg_buffer_length);
            let chunk = &payload[offset..offset + chunk_len];
            let header = PacketHeader {
                msg_type,
                msg_id,
                payload_size: payload.len() as i32,
                current_packet,
                total_packets,
                response_id,
            };

            let start = Instant::now();
            let ok = self.outbound.write(
                |slot| {
                    slot[..HEADER_SIZE].copy_from_slice(&header.encode());
                    slot[HEADER_SIZE..HEADER_SIZE + chunk_len].copy_from_slice(chunk);
                    HEADER_SIZE + chunk_len
                },
                WRITE_TIMEOUT,
            )?;
            if !ok {
                warn!(
                    "write timed out on '{}': msg_id={msg_id} packet={current_packet}/{total_packets}",
                    self.name
                );
                return Ok(false);
            }
            let wait_ticks = start.elapsed().as_millis() as u64;
            self.stats.record_packet_written(HEADER_SIZE + chunk_len, wait_ticks);
            trace!(
                "wrote packet on '{}': msg_id={msg_id} {current_packet}/{total_packets} bytes={chunk_len}",
                self.name
            );
        }

        self.stats
            .record_message_sent(matches!(msg_type, MsgType::Request), matches!(msg_type, MsgType::Error));
        Ok(true)
    }

    fn spawn_read_loop(inner: Arc<ChannelInner>) {
        std::thread::Builder::new()
            .name(format!("rpc-read-{}", inner.name))
            .spawn(move || Self::read_loop(inner))
            .expect("spawn read loop thread");
    }

    fn read_loop(inner: Arc<ChannelInner>) {
        loop {
            if inner.needs_managed_dispose.load(Ordering::SeqCst) {
                let count = *inner.process_count.lock().unwrap();
                if count == 0 {
                    inner.teardown();
                }
            }
            if inner.disposed.load(Ordering::SeqCst) != ALIVE {
                return;
            }

            *inner.reading_in_progress.lock().unwrap() = true;
            let result = inner
                .inbound
                .read(|slot| Self::handle_inbound_packet(&inner, slot), READ_TIMEOUT);
            *inner.reading_in_progress.lock().unwrap() = false;

            if let Err(e) = result {
                warn!("rpc read loop error on '{}': {e}", inner.name);
            }
        }
    }

    fn handle_inbound_packet(inner: &Arc<ChannelInner>, slot: &[u8]) {
        let header = match PacketHeader::decode(slot) {
            Some(h) => h,
            None => {
                warn!("dropping unparsable packet on '{}'", inner.name);
                return;
            }
        };
        match header.msg_type {
            MsgType::Response | MsgType::Error => Self::handle_response_packet(inner, &header, slot),
            MsgType::Request => Self::handle_request_packet(inner, &header, slot),
        }
    }

    fn handle_response_packet(inner: &Arc<ChannelInner>, header: &PacketHeader, slot: &[u8]) {
        let packet_size = packet_size_for(
            header.payload_size as u32,
            header.current_packet,
            header.total_packets,
            inner.msg_buffer_length,
        );
        inner.stats.record_packet_read(slot.len());

        let pending = match inner.tables.pending.get(&header.response_id).map(|e| Arc::clone(e.value())) {
            Some(p) => p,
            None => {
                inner.stats.record_discarded_response(header.response_id);
                warn!(
                    "discarded response on '{}': no pending request for msg_id={}",
                    inner.name, header.response_id
                );
                return;
            }
        };

        if header.payload_size > 0 {
            let mut partial = pending.partial.lock().unwrap();
            let buf = partial.get_or_insert_with(|| vec![0u8; header.payload_size as usize]);
            let offset = inner.msg_buffer_length * (header.current_packet as usize - 1);
            buf[offset..offset + packet_size].copy_from_slice(&slot[HEADER_SIZE..HEADER_SIZE + packet_size]);
        }

        if header.current_packet == header.total_packets {
            inner.tables.pending.remove(&header.response_id);
            let data = pending.partial.lock().unwrap().take();
            let is_error = matches!(header.msg_type, MsgType::Error);
            inner.stats.record_message_received(!is_error, is_error);
            let response = if is_error { RpcResponse::fail() } else { RpcResponse::ok(data) };
            pending.try_complete(response);
            trace!(
                "completed request on '{}': msg_id={} success={} elapsed={:?}",
                inner.name,
                header.response_id,
                !is_error,
                pending.created_at.elapsed()
            );
        }
    }

    fn handle_request_packet(inner: &Arc<ChannelInner>, header: &PacketHeader, slot: &[u8]) {
        let packet_size = packet_size_for(
            header.payload_size as u32,
            header.current_packet,
            header.total_packets,
            inner.msg_buffer_length,
        );
        inner.stats.record_packet_read(slot.len());

        if header.payload_size > 0 {
            let mut entry = inner
                .tables
                .incoming
                .entry(header.msg_id)
                .or_insert_with(|| InboundPartial::new(header.payload_size as u32, header.total_packets));
            let offset = inner.msg_buffer_length * (header.current_packet as usize - 1);
            entry.buf[offset..offset + packet_size].copy_from_slice(&slot[HEADER_SIZE..HEADER_SIZE + packet_size]);
        } else {
            inner
                .tables
                .incoming
                .entry(header.msg_id)
                .or_insert_with(|| InboundPartial::new(0, header.total_packets));
        }

        if header.current_packet == header.total_packets {
            let (_, complete) = inner
                .tables
                .incoming
                .remove(&header.msg_id)
                .expect("entry inserted above for this msg_id");
            inner.stats.record_message_received(false, false);
            trace!(
                "reassembled request on '{}': msg_id={} bytes={}",
                inner.name,
                header.msg_id,
                complete.buf.len()
            );

            {
                let mut count = inner.process_count.lock().unwrap();
                *count += 1;
            }
            let inner2 = Arc::clone(inner);
            let msg_id = header.msg_id;
            std::thread::spawn(move || Self::dispatch(inner2, msg_id, complete.buf));
        }
    }

    fn dispatch(inner: Arc<ChannelInner>, msg_id: u64, data: Vec<u8>) {
        let handler = inner.handler.lock().unwrap().clone();
        let responder = Self::make_responder(Arc::clone(&inner), msg_id);
        match handler {
            Some(h) => h.invoke(msg_id, data, responder),
            None => responder.fail(),
        }
    }

    fn make_responder(inner: Arc<ChannelInner>, msg_id: u64) -> Responder {
        Responder::new(
            msg_id,
            Box::new(move |success, data| {
                let response_msg_id = inner.next_msg_id.fetch_add(1, Ordering::Relaxed) + 1;
                let msg_type = if success { MsgType::Response } else { MsgType::Error };
                let payload = data.unwrap_or_default();
                if let Err(e) = inner.write_framed(msg_type, response_msg_id, &payload, msg_id) {
                    warn!("failed to send response on '{}' for msg_id={msg_id}: {e}", inner.name);
                }
                inner.finish_dispatch();
            }),
        )
    }

    fn finish_dispatch(self: &Arc<Self>) {
        let mut count = self.process_count.lock().unwrap();
        *count -= 1;
        if *count == 0 && self.needs_managed_dispose.load(Ordering::SeqCst) {
            let reading = self.reading_in_progress.lock().unwrap();
            if !*reading {
                drop(reading);
                drop(count);
                self.teardown();
            }
        }
    }

    /// spec.md §4.6: requests shutdown, deferring if a request is in flight
    /// or the read loop is inside a visitor.
    fn request_dispose(self: &Arc<Self>) {
        let reading = self.reading_in_progress.lock().unwrap();
        let count = self.process_count.lock().unwrap();
        if *count > 0 || *reading {
            self.needs_managed_dispose.store(true, Ordering::SeqCst);
            return;
        }
        drop(count);
        drop(reading);
        self.teardown();
    }

    /// Idempotent: the first caller to win the `ALIVE -> DISPOSING` CAS does
    /// the work, everyone else's call is a no-op.
    fn teardown(self: &Arc<Self>) {
        *self.handler.lock().unwrap() = None;
        if self
            .disposed
            .compare_exchange(ALIVE, DISPOSING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let _ = self.outbound.shutdown();
        let _ = self.inbound.shutdown();

        // Wake every caller still blocked in `PendingRequest::wait` — an
        // infinite-timeout request has no timer thread of its own, so
        // without this it would never learn the channel is gone.
        for entry in self.tables.pending.iter() {
            entry.value().try_complete(RpcResponse::fail());
        }
        self.tables.pending.clear();

        if let Some(mutex) = self.election_mutex.lock().unwrap().take() {
            if let Err(e) = mutex.unlock() {
                warn!("failed to release master election mutex on '{}': {e}", self.name);
            }
        }
        if let Some(shm) = self.meta_shm.lock().unwrap().take() {
            shm.unlink();
        }

        self.disposed.store(FINISHED, Ordering::SeqCst);
        let mut done = self.dispose_done.lock().unwrap();
        *done = true;
        self.dispose_cv.notify_all();
        debug!("rpc channel '{}' disposed", self.name);
    }
}

/// Both peers open the same named mutex and race to lock it within
/// `timeout_ms` (spec.md §4.6). Whoever acquires it is master and keeps it
/// held for the channel's whole lifetime — releasing it is itself the
/// "master is gone" signal, so no separate "was I the creator" flag is
/// needed. The peer that times out is slave.
fn elect_role(election_name: &str, timeout_ms: u64) -> Result<(Role, Option<IpcMutex>), RpcError> {
    let mutex = IpcMutex::open(election_name)?;
    if mutex.lock_timeout(timeout_ms)? {
        Ok((Role::Master, Some(mutex)))
    } else {
        Ok((Role::Slave, None))
    }
}

/// Remove every named segment and waiter a channel of this name could have
/// created, on both sides. Intended for test teardown and stale-run cleanup,
/// not for use while a channel with this name is open (spec.md §4.6).
pub fn clear_storage(name: &str) {
    Ring::clear_storage(&format!("{name}_Master_SharedMemory_MMF"));
    Ring::clear_storage(&format!("{name}_Slave_SharedMemory_MMF"));
    meta::clear_storage(&format!("{name}_Meta_SharedMemory_MMF"));
    IpcMutex::clear_storage(&format!("{name}SharedMemory_MasterMutex"));
}
