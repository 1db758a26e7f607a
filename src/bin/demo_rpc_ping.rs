// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Usage:
//   demo_rpc_ping master
//   demo_rpc_ping slave
//
// Two processes share an RPC channel named "rpc_ping". Whichever one opens
// it first becomes the master. The slave echoes every request it receives;
// the master sends one request per second and prints the round trip.

use std::time::Duration;

use libipc::{rpc, Handler, RpcChannelConfig};

fn do_slave() {
    let handler = Handler::request_with_result(|msg_id, data| {
        log::info!("slave: echoing msg_id={msg_id} ({} bytes)", data.len());
        Ok(data.to_vec())
    });
    let channel = RpcChannelConfig::new("rpc_ping")
        .handler(handler)
        .open()
        .expect("open slave channel");
    log::info!("slave: role={:?}", channel.role());

    loop {
        std::thread::sleep(Duration::from_secs(1));
        log::info!("slave: stats={:?}", channel.stats());
    }
}

fn do_master() {
    let channel = RpcChannelConfig::new("rpc_ping").open().expect("open master channel");
    log::info!("master: role={:?}", channel.role());

    let mut n: u64 = 0;
    loop {
        n += 1;
        let payload = format!("ping {n}");
        let start = std::time::Instant::now();
        match channel.remote_request(Some(payload.as_bytes()), Some(rpc::DEFAULT_TIMEOUT)) {
            Ok(response) if response.success => {
                log::info!(
                    "master: got {:?} in {:?}",
                    response.data.map(|d| String::from_utf8_lossy(&d).into_owned()),
                    start.elapsed()
                );
            }
            Ok(_) => log::warn!("master: request {n} failed"),
            Err(e) => log::error!("master: request {n} errored: {e}"),
        }
        std::thread::sleep(Duration::from_secs(1));
    }
}

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("master") => do_master(),
        Some("slave") => do_slave(),
        _ => {
            eprintln!("usage: demo_rpc_ping <master|slave>");
            std::process::exit(1);
        }
    }
}
