// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use libipc::{rpc, Handler, RpcChannelConfig, RpcError};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_rpc_{n}")
}

#[test]
fn buffer_capacity_below_minimum_is_rejected() {
    let name = unique_name("cap_low");
    let err = RpcChannelConfig::new(&name).buffer_capacity(255).open().unwrap_err();
    assert!(matches!(err, RpcError::OutOfRangeConfig(_)));
}

#[test]
fn buffer_capacity_above_maximum_is_rejected() {
    let name = unique_name("cap_high");
    let err = RpcChannelConfig::new(&name)
        .buffer_capacity(1_048_577)
        .open()
        .unwrap_err();
    assert!(matches!(err, RpcError::OutOfRangeConfig(_)));
}

#[test]
fn echoes_a_request() {
    let name = unique_name("echo");
    rpc::clear_storage(&name);

    let slave_name = name.clone();
    let slave = thread::spawn(move || {
        let handler = Handler::request_with_result(|_id, data| Ok(data.to_vec()));
        let channel = RpcChannelConfig::new(&slave_name).handler(handler).open().expect("slave open");
        thread::sleep(Duration::from_millis(500));
        channel.dispose();
        channel.wait_disposed(Some(Duration::from_secs(2)));
    });

    thread::sleep(Duration::from_millis(20));
    let master = RpcChannelConfig::new(&name).open().expect("master open");

    let response = master
        .remote_request(Some(b"ping"), Some(Duration::from_secs(2)))
        .expect("request");
    assert!(response.success);
    assert_eq!(response.data.as_deref(), Some(&b"ping"[..]));

    master.dispose();
    master.wait_disposed(Some(Duration::from_secs(2)));
    slave.join().unwrap();
    rpc::clear_storage(&name);
}

#[test]
fn roles_are_complementary() {
    let name = unique_name("roles");
    rpc::clear_storage(&name);

    let other_name = name.clone();
    let slave = thread::spawn(move || {
        let channel = RpcChannelConfig::new(&other_name).open().expect("slave open");
        let role = channel.role();
        thread::sleep(Duration::from_millis(200));
        channel.dispose();
        channel.wait_disposed(Some(Duration::from_secs(2)));
        role
    });

    thread::sleep(Duration::from_millis(20));
    let master = RpcChannelConfig::new(&name).open().expect("master open");
    assert_eq!(master.role(), rpc::Role::Master);

    master.dispose();
    master.wait_disposed(Some(Duration::from_secs(2)));
    let slave_role = slave.join().unwrap();
    assert_eq!(slave_role, rpc::Role::Slave);
    rpc::clear_storage(&name);
}

#[test]
fn large_payload_spans_multiple_packets() {
    let name = unique_name("large");
    rpc::clear_storage(&name);

    let payload = vec![0x5au8; 50_000];
    let expected = payload.clone();

    let slave_name = name.clone();
    let slave = thread::spawn(move || {
        let handler = Handler::request_with_result(|_id, data| Ok(data.to_vec()));
        let channel = RpcChannelConfig::new(&slave_name)
            .buffer_capacity(512)
            .handler(handler)
            .open()
            .expect("slave open");
        thread::sleep(Duration::from_millis(500));
        channel.dispose();
        channel.wait_disposed(Some(Duration::from_secs(2)));
    });

    thread::sleep(Duration::from_millis(20));
    let master = RpcChannelConfig::new(&name).buffer_capacity(512).open().expect("master open");

    let response = master
        .remote_request(Some(&payload), Some(Duration::from_secs(5)))
        .expect("request");
    assert!(response.success);
    assert_eq!(response.data, Some(expected));

    master.dispose();
    master.wait_disposed(Some(Duration::from_secs(2)));
    slave.join().unwrap();
    rpc::clear_storage(&name);
}

#[test]
fn handler_error_becomes_failed_response() {
    let name = unique_name("err");
    rpc::clear_storage(&name);

    let slave_name = name.clone();
    let slave = thread::spawn(move || {
        let handler = Handler::request_with_result(|_id, _data| Err("boom".into()));
        let channel = RpcChannelConfig::new(&slave_name).handler(handler).open().expect("slave open");
        thread::sleep(Duration::from_millis(400));
        channel.dispose();
        channel.wait_disposed(Some(Duration::from_secs(2)));
    });

    thread::sleep(Duration::from_millis(20));
    let master = RpcChannelConfig::new(&name).open().expect("master open");

    let response = master
        .remote_request(Some(b"anything"), Some(Duration::from_secs(2)))
        .expect("request");
    assert!(!response.success);
    assert!(response.data.is_none());

    master.dispose();
    master.wait_disposed(Some(Duration::from_secs(2)));
    slave.join().unwrap();
    rpc::clear_storage(&name);
}

#[test]
fn request_with_no_peer_times_out() {
    let name = unique_name("timeout");
    rpc::clear_storage(&name);

    let master = RpcChannelConfig::new(&name).open().expect("master open");
    let before = master.stats().timeouts;

    let response = master
        .remote_request(Some(b"hello"), Some(Duration::from_millis(150)))
        .expect("request");
    assert!(!response.success);

    let after = master.stats().timeouts;
    assert_eq!(after, before + 1);

    master.dispose();
    master.wait_disposed(Some(Duration::from_secs(2)));
    rpc::clear_storage(&name);
}

#[test]
fn zero_timeout_fails_without_sending() {
    let name = unique_name("zero");
    rpc::clear_storage(&name);

    let master = RpcChannelConfig::new(&name).open().expect("master open");
    let response = master
        .remote_request(Some(b"hello"), Some(Duration::ZERO))
        .expect("request");
    assert!(!response.success);
    assert_eq!(master.stats().requests_sent, 0);

    master.dispose();
    master.wait_disposed(Some(Duration::from_secs(2)));
    rpc::clear_storage(&name);
}

#[test]
fn concurrent_requests_survive_dispose_in_flight() {
    let name = unique_name("drain");
    rpc::clear_storage(&name);

    let slave_name = name.clone();
    let slave = thread::spawn(move || {
        let handler = Handler::request_with_result(|_id, data| {
            thread::sleep(Duration::from_millis(20));
            Ok(data.to_vec())
        });
        let channel = RpcChannelConfig::new(&slave_name).handler(handler).open().expect("slave open");
        thread::sleep(Duration::from_millis(1500));
        channel.dispose();
        channel.wait_disposed(Some(Duration::from_secs(3)));
    });

    thread::sleep(Duration::from_millis(20));
    let master = Arc::new(RpcChannelConfig::new(&name).open().expect("master open"));

    let mut handles = Vec::new();
    for i in 0..50 {
        let master = Arc::clone(&master);
        // A mix of bounded and infinite timeouts: the latter has no timer
        // thread of its own and depends entirely on `dispose()` waking it.
        let timeout = if i % 2 == 0 { Some(Duration::from_secs(5)) } else { None };
        handles.push(thread::spawn(move || {
            let payload = format!("req-{i}");
            master.remote_request(Some(payload.as_bytes()), timeout)
        }));
    }

    // Race `dispose()` against the in-flight requests instead of waiting for
    // them to finish first — this is the scenario that actually exercises
    // outstanding callers observing shutdown mid-flight.
    master.dispose();

    for h in handles {
        match h.join().unwrap() {
            Ok(response) => assert!(response.success || response.data.is_none()),
            Err(e) => assert!(matches!(e, RpcError::ChannelClosed | RpcError::AlreadyDisposed)),
        }
    }

    assert!(master.wait_disposed(Some(Duration::from_secs(3))));
    slave.join().unwrap();
    rpc::clear_storage(&name);
}
