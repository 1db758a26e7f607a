// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// A bounded shared-memory ring of fixed-size slots, with blocking
// `read(visitor, timeout)` / `write(visitor, timeout)` and a `shutting_down`
// flag — the external collaborator spec.md assumes but leaves out of scope.
// Built the way `channel.rs` builds `Route`/`Channel`: a `ShmHandle` region,
// `Waiter` pairs for blocking, and a CAS-claim loop so multiple writer
// threads in one process can push packets concurrently. Unlike `Route`, this
// ring has exactly one reader, so there is no connection bitmask or epoch —
// bounding is a plain `write_idx - read_idx < capacity` check, and the
// "constructed" gate on first open mirrors `proto::ShmRing::open_or_create`.

use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::shm::{ShmHandle, ShmOpenMode};
use crate::waiter::Waiter;

const SLOT_EMPTY: u32 = 0;
const SLOT_READY: u32 = 1;

#[repr(C)]
struct RingHeader {
    write_idx: AtomicU64,
    read_idx: AtomicU64,
    constructed: AtomicU32,
    shutting_down: AtomicU32,
}

const HEADER_SIZE: usize = 64; // round up for cache-line alignment of the slot array

#[repr(C)]
struct SlotMeta {
    state: AtomicU32,
    len: AtomicU32,
}

const SLOT_META_SIZE: usize = std::mem::size_of::<SlotMeta>();

/// A bounded ring of `capacity` fixed-size slots of `slot_size` bytes each,
/// backed by a named shared memory segment. One side writes packets, the
/// other reads them; `write`/`read` block up to `timeout` and both respect
/// `shutdown()`.
pub struct Ring {
    shm: ShmHandle,
    capacity: usize,
    slot_size: usize,
    wt_waiter: Waiter,
    rd_waiter: Waiter,
}

impl Ring {
    fn region_size(capacity: usize, slot_size: usize) -> usize {
        HEADER_SIZE + capacity * (SLOT_META_SIZE + slot_size)
    }

    fn waiter_names(name: &str) -> (String, String) {
        (format!("{name}_RingWT__"), format!("{name}_RingRD__"))
    }

    /// Create the backing segment if it does not already exist, or attach to
    /// it if a previous run (or a racing peer) got there first. Used by the
    /// master, which owns sizing.
    pub fn open_or_create(name: &str, capacity: usize, slot_size: usize) -> io::Result<Self> {
        let shm = ShmHandle::acquire(name, Self::region_size(capacity, slot_size), ShmOpenMode::CreateOrOpen)?;
        let hdr = unsafe { &*(shm.get() as *const RingHeader) };
        if hdr.constructed.load(Ordering::Acquire) == 0 {
            hdr.write_idx.store(0, Ordering::Relaxed);
            hdr.read_idx.store(0, Ordering::Relaxed);
            hdr.shutting_down.store(0, Ordering::Relaxed);
            unsafe {
                let slots = shm.get().add(HEADER_SIZE);
                std::ptr::write_bytes(slots, 0, capacity * (SLOT_META_SIZE + slot_size));
            }
            hdr.constructed.store(1, Ordering::Release);
        }
        let (wt_name, rd_name) = Self::waiter_names(name);
        Ok(Self {
            shm,
            capacity,
            slot_size,
            wt_waiter: Waiter::open(&wt_name)?,
            rd_waiter: Waiter::open(&rd_name)?,
        })
    }

    /// Attach to a segment the master has already sized and constructed.
    /// Used by the slave, which inherits sizing out-of-band (see
    /// `rpc::channel`'s handshake segment) rather than from this call.
    /// Polls briefly for `constructed` in case the slave wins the race to
    /// open before the master finishes initialising the region.
    pub fn open_existing(name: &str, capacity: usize, slot_size: usize) -> io::Result<Self> {
        let shm = ShmHandle::acquire(name, Self::region_size(capacity, slot_size), ShmOpenMode::CreateOrOpen)?;
        let hdr = unsafe { &*(shm.get() as *const RingHeader) };
        let deadline = Instant::now() + Duration::from_millis(2000);
        while hdr.constructed.load(Ordering::Acquire) == 0 {
            if Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("ring '{name}' never became ready"),
                ));
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        let (wt_name, rd_name) = Self::waiter_names(name);
        Ok(Self {
            shm,
            capacity,
            slot_size,
            wt_waiter: Waiter::open(&wt_name)?,
            rd_waiter: Waiter::open(&rd_name)?,
        })
    }

    fn header(&self) -> &RingHeader {
        unsafe { &*(self.shm.get() as *const RingHeader) }
    }

    fn stride(&self) -> usize {
        SLOT_META_SIZE + self.slot_size
    }

    fn slot_meta(&self, idx: usize) -> &SlotMeta {
        let base = unsafe { self.shm.get().add(HEADER_SIZE + idx * self.stride()) };
        unsafe { &*(base as *const SlotMeta) }
    }

    fn slot_data(&self, idx: usize) -> *mut u8 {
        unsafe {
            self.shm
                .get()
                .add(HEADER_SIZE + idx * self.stride() + SLOT_META_SIZE)
        }
    }

    /// Usable bytes per slot (the packet header plus fragment payload).
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn is_shutting_down(&self) -> bool {
        self.header().shutting_down.load(Ordering::Acquire) != 0
    }

    /// Flip `shutting_down` and wake every blocked reader/writer so their
    /// `read`/`write` calls return `false` instead of hanging.
    pub fn shutdown(&self) -> io::Result<()> {
        self.header().shutting_down.store(1, Ordering::Release);
        self.wt_waiter.broadcast()?;
        self.rd_waiter.broadcast()?;
        Ok(())
    }

    /// Claim the next slot, hand it to `visit` to fill, and publish it to the
    /// reader. Blocks up to `timeout` if the ring is full. Returns `false` on
    /// timeout or if shutdown was observed before a slot could be claimed.
    pub fn write<F>(&self, visit: F, timeout: Duration) -> io::Result<bool>
    where
        F: FnOnce(&mut [u8]) -> usize,
    {
        if self.is_shutting_down() {
            return Ok(false);
        }
        let hdr = self.header();
        let deadline = Instant::now() + timeout;

        let idx = loop {
            if self.is_shutting_down() {
                return Ok(false);
            }
            let w = hdr.write_idx.load(Ordering::Relaxed);
            let r = hdr.read_idx.load(Ordering::Acquire);
            if w.wrapping_sub(r) as usize >= self.capacity {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Ok(false);
                }
                let woke = self.wt_waiter.wait_if(
                    || {
                        let w2 = hdr.write_idx.load(Ordering::Relaxed);
                        let r2 = hdr.read_idx.load(Ordering::Acquire);
                        w2.wrapping_sub(r2) as usize >= self.capacity
                    },
                    Some(remaining.as_millis() as u64),
                )?;
                if !woke {
                    return Ok(false);
                }
                continue;
            }
            match hdr.write_idx.compare_exchange_weak(
                w,
                w.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break (w % self.capacity as u64) as usize,
                Err(_) => std::thread::yield_now(),
            }
        };

        let meta = self.slot_meta(idx);
        let slot = unsafe { std::slice::from_raw_parts_mut(self.slot_data(idx), self.slot_size) };
        let written = visit(slot);
        meta.len.store(written as u32, Ordering::Relaxed);
        meta.state.store(SLOT_READY, Ordering::Release);
        self.rd_waiter.broadcast()?;
        Ok(true)
    }

    /// Block until a slot is available, hand its written bytes (trimmed to
    /// the length `write` recorded) to `visit`, then free the slot. Returns
    /// `false` on timeout or shutdown.
    pub fn read<F>(&self, mut visit: F, timeout: Duration) -> io::Result<bool>
    where
        F: FnMut(&[u8]),
    {
        let hdr = self.header();
        let deadline = Instant::now() + timeout;

        loop {
            if self.is_shutting_down() {
                return Ok(false);
            }
            let r = hdr.read_idx.load(Ordering::Relaxed);
            let w = hdr.write_idx.load(Ordering::Acquire);
            if r == w {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Ok(false);
                }
                let woke = self.rd_waiter.wait_if(
                    || {
                        let w2 = hdr.write_idx.load(Ordering::Acquire);
                        hdr.read_idx.load(Ordering::Relaxed) == w2
                    },
                    Some(remaining.as_millis() as u64),
                )?;
                if !woke {
                    return Ok(false);
                }
                continue;
            }

            let idx = (r % self.capacity as u64) as usize;
            let meta = self.slot_meta(idx);

            // `write_idx` advances the instant a slot is claimed, slightly
            // ahead of the slot's bytes actually being filled in. Spin for
            // the ready flag rather than racing the still-in-flight writer.
            let mut k = 0u32;
            while meta.state.load(Ordering::Acquire) != SLOT_READY {
                if self.is_shutting_down() || Instant::now() >= deadline {
                    return Ok(false);
                }
                crate::spin_lock::adaptive_yield_pub(&mut k);
            }

            let len = (meta.len.load(Ordering::Relaxed) as usize).min(self.slot_size);
            let slot = unsafe { std::slice::from_raw_parts(self.slot_data(idx), len) };
            visit(slot);

            meta.state.store(SLOT_EMPTY, Ordering::Release);
            hdr.read_idx.fetch_add(1, Ordering::Release);
            self.wt_waiter.broadcast()?;
            return Ok(true);
        }
    }

    /// Remove the backing storage and waiters for a named ring.
    pub fn clear_storage(name: &str) {
        ShmHandle::clear_storage(name);
        let (wt_name, rd_name) = Self::waiter_names(name);
        Waiter::clear_storage(&wt_name);
        Waiter::clear_storage(&rd_name);
    }
}
