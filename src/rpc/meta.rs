// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// A tiny fixed-size shared memory block the master uses to publish the ring
// sizing (`buffer_capacity`, `buffer_node_count`) the slave needs before it
// can `Ring::open_existing` the same two rings: `ShmHandle::Open` requires
// the caller to already know the region size, so the slave cannot discover
// it from the ring segments themselves. Modeled after `Ring`'s own
// `constructed` gate in `proto::ShmRing`.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::shm::{ShmHandle, ShmOpenMode};

#[repr(C)]
struct MetaHeader {
    ready: AtomicU32,
    buffer_capacity: AtomicU32,
    buffer_node_count: AtomicU32,
}

pub(crate) struct RingSizing {
    pub(crate) buffer_capacity: usize,
    pub(crate) buffer_node_count: usize,
}

/// Master side: publish sizing for the slave to discover. Keeps the segment
/// alive for the lifetime of the returned handle.
pub(crate) fn publish(name: &str, buffer_capacity: usize, buffer_node_count: usize) -> io::Result<ShmHandle> {
    let shm = ShmHandle::acquire(name, std::mem::size_of::<MetaHeader>(), ShmOpenMode::CreateOrOpen)?;
    let hdr = unsafe { &*(shm.get() as *const MetaHeader) };
    hdr.buffer_capacity.store(buffer_capacity as u32, Ordering::Relaxed);
    hdr.buffer_node_count.store(buffer_node_count as u32, Ordering::Relaxed);
    hdr.ready.store(1, Ordering::Release);
    Ok(shm)
}

/// Slave side: block until the master has published sizing, or time out.
pub(crate) fn discover(name: &str, timeout: Duration) -> io::Result<RingSizing> {
    let shm = ShmHandle::acquire(name, std::mem::size_of::<MetaHeader>(), ShmOpenMode::CreateOrOpen)?;
    let hdr = unsafe { &*(shm.get() as *const MetaHeader) };
    let deadline = Instant::now() + timeout;
    while hdr.ready.load(Ordering::Acquire) == 0 {
        if Instant::now() >= deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("ring sizing for '{name}' was never published"),
            ));
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    Ok(RingSizing {
        buffer_capacity: hdr.buffer_capacity.load(Ordering::Relaxed) as usize,
        buffer_node_count: hdr.buffer_node_count.load(Ordering::Relaxed) as usize,
    })
}

pub(crate) fn clear_storage(name: &str) {
    ShmHandle::clear_storage(name);
}
