// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Bidirectional shared-memory request/response RPC core connecting exactly
// two peers. `codec` is the wire format; `ring`/`meta` are the transport and
// its sizing handshake; `correlation` matches responses to requests and
// reassembles fragments; `dispatcher` normalizes the four handler shapes;
// `stats` is the counters exposed through `RpcChannel::stats`; `channel`
// ties all of it together into the public `RpcChannel` API.

mod channel;
mod codec;
mod correlation;
mod dispatcher;
mod error;
mod meta;
mod ring;
mod stats;

pub use channel::{
    clear_storage, PendingResponse, ProtocolVersion, Role, RpcChannel, RpcChannelConfig,
    DEFAULT_BUFFER_CAPACITY, DEFAULT_BUFFER_NODE_COUNT, DEFAULT_TIMEOUT,
};
pub use codec::{MsgType, PacketHeader, HEADER_SIZE};
pub use correlation::RpcResponse;
pub use dispatcher::{Handler, HandlerResult, Responder};
pub use error::RpcError;
pub use stats::StatsSnapshot;
