// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared-memory primitives (named mutex, condition variable, semaphore,
// spin lock, rw lock, buffer) plus a master/slave request/response RPC
// core built on top of them.

pub mod shm_name;

mod platform;

mod shm;
pub use shm::{ShmHandle, ShmOpenMode};

mod mutex;
pub use mutex::IpcMutex;

mod condition;
pub use condition::IpcCondition;

mod semaphore;
pub use semaphore::IpcSemaphore;

mod waiter;
pub use waiter::Waiter;

mod spin_lock;
pub use spin_lock::SpinLock;

mod rw_lock;
pub use rw_lock::RwLock;

mod buffer;
pub use buffer::IpcBuffer;

mod scoped_access;
pub use scoped_access::ScopedAccess;

pub mod rpc;
pub use rpc::{
    Handler, HandlerResult, MsgType, PacketHeader, PendingResponse, ProtocolVersion, Responder,
    Role, RpcChannel, RpcChannelConfig, RpcError, RpcResponse, StatsSnapshot, HEADER_SIZE,
};
