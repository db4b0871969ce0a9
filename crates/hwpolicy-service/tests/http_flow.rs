use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hwpolicy_core::HardwareCatalog;
use hwpolicy_service::{PolicyService, PolicySettings, RpcServer};
use hwpolicy_storage::MemoryStore;
use serde_json::{json, Value};

fn reserve_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("reserve addr");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    addr.to_string()
}

fn wait_for_http(addr: &str) {
    for _ in 0..80 {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    panic!("http server not ready on {addr}");
}

fn send_http(addr: &str, method: &str, path: &str, body: &str) -> String {
    let mut stream = TcpStream::connect(addr).expect("connect http");
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).expect("write request");
    stream.flush().expect("flush");
    let mut buf = String::new();
    stream.read_to_string(&mut buf).expect("read response");
    buf
}

/// Sends a request head that declares `content_length` but no body.
fn send_head_only(addr: &str, content_length: &str) -> String {
    let mut stream = TcpStream::connect(addr).expect("connect http");
    let request = format!(
        "POST /rpc HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {content_length}\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).expect("write request");
    stream.flush().expect("flush");
    let mut buf = String::new();
    stream.read_to_string(&mut buf).expect("read response");
    buf
}

fn response_json(response: &str) -> Value {
    let body = response.split("\r\n\r\n").nth(1).unwrap_or("");
    serde_json::from_str(body).expect("response json")
}

/// Serves an in-memory service on an ephemeral port from a detached thread.
fn serve_in_process() -> String {
    let settings = PolicySettings {
        persist_timeout: Duration::ZERO,
        ..PolicySettings::default()
    };
    let service = PolicyService::new(
        HardwareCatalog::builtin(),
        settings,
        Arc::new(MemoryStore::new()),
    )
    .expect("service");
    let server = RpcServer::new(Arc::new(service));
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    std::thread::spawn(move || server.serve_listener(&listener));
    addr
}

#[test]
fn daemon_serves_health_policy_and_rpc() {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let state_path = std::env::temp_dir().join(format!("hwpolicyd-http-{now}.json"));
    let addr = reserve_addr();

    let mut child = Command::new(env!("CARGO_BIN_EXE_hwpolicyd"))
        .env("HWPOLICY_TRANSPORT", "http")
        .env("HWPOLICY_HTTP_ADDR", &addr)
        .env("HWPOLICY_STATE_PATH", &state_path)
        .env("HWPOLICY_DECAY_INTERVAL_SECS", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn hwpolicyd");

    wait_for_http(&addr);

    let health = send_http(&addr, "GET", "/health", "");
    assert!(health.starts_with("HTTP/1.1 200"));
    assert_eq!(response_json(&health)["status"], json!("ok"));

    let report = r#"{"jsonrpc":"2.0","id":1,"method":"policy/report_outcome","params":{"cause":"timeout","impact":{"risk":0.2,"cost":-0.2}}}"#;
    let reported = send_http(&addr, "POST", "/rpc", report);
    assert!(reported.starts_with("HTTP/1.1 200"));
    assert_eq!(response_json(&reported)["result"]["snapshot"]["v"], json!(2));

    let policy = send_http(&addr, "GET", "/policy", "");
    assert_eq!(response_json(&policy)["version"], json!(2));

    let stored: Value =
        serde_json::from_slice(&std::fs::read(&state_path).expect("state file")).expect("json");
    assert_eq!(stored["v"], json!(2));

    let _ = child.kill();
    let _ = child.wait();
    let _ = std::fs::remove_file(state_path);
}

#[test]
fn http_routes_reject_unknown_paths_and_methods() {
    let addr = serve_in_process();
    wait_for_http(&addr);

    assert!(send_http(&addr, "GET", "/nope", "").starts_with("HTTP/1.1 404"));
    assert!(send_http(&addr, "DELETE", "/policy", "").starts_with("HTTP/1.1 405"));

    let notification = r#"{"jsonrpc":"2.0","method":"policy/decay"}"#;
    assert!(send_http(&addr, "POST", "/rpc", notification).starts_with("HTTP/1.1 204"));

    let garbage = send_http(&addr, "POST", "/rpc", "{oops");
    assert!(garbage.starts_with("HTTP/1.1 200"));
    assert_eq!(response_json(&garbage)["error"]["code"], json!(-32700));
}

#[test]
fn http_history_honours_limit() {
    let addr = serve_in_process();
    wait_for_http(&addr);

    for id in 0..4 {
        let body = format!(
            r#"{{"jsonrpc":"2.0","id":{id},"method":"policy/report_outcome","params":{{"impact":{{"perf":0.05}}}}}}"#
        );
        send_http(&addr, "POST", "/rpc", &body);
    }
    let history = response_json(&send_http(&addr, "GET", "/history?limit=2", ""));
    let versions = history["result"]["history"]
        .as_array()
        .expect("history")
        .iter()
        .filter_map(|s| s["v"].as_u64())
        .collect::<Vec<_>>();
    assert_eq!(versions, vec![4, 5]);
}

#[test]
fn oversized_body_is_refused_and_daemon_keeps_serving() {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let state_path = std::env::temp_dir().join(format!("hwpolicyd-http-large-{now}.json"));
    let addr = reserve_addr();

    let mut child = Command::new(env!("CARGO_BIN_EXE_hwpolicyd"))
        .env("HWPOLICY_TRANSPORT", "http")
        .env("HWPOLICY_HTTP_ADDR", &addr)
        .env("HWPOLICY_STATE_PATH", &state_path)
        .env("HWPOLICY_DECAY_INTERVAL_SECS", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn hwpolicyd");

    wait_for_http(&addr);

    let huge = send_head_only(&addr, "9223372036854775807");
    assert!(huge.starts_with("HTTP/1.1 413"), "{huge}");
    assert_eq!(response_json(&huge)["error"], json!("payload_too_large"));

    let just_over = send_head_only(&addr, &(1024 * 1024 + 1).to_string());
    assert!(just_over.starts_with("HTTP/1.1 413"), "{just_over}");

    let bad = send_head_only(&addr, "not-a-number");
    assert!(bad.starts_with("HTTP/1.1 400"), "{bad}");

    let health = send_http(&addr, "GET", "/health", "");
    assert!(health.starts_with("HTTP/1.1 200"), "{health}");
    assert!(child.try_wait().expect("poll child").is_none());

    let _ = child.kill();
    let _ = child.wait();
    let _ = std::fs::remove_file(state_path);
}

#[test]
fn more_clients_than_handler_threads_are_all_answered() {
    let addr = serve_in_process();
    wait_for_http(&addr);

    let clients = (0..48)
        .map(|_| {
            let addr = addr.clone();
            std::thread::spawn(move || send_http(&addr, "GET", "/health", ""))
        })
        .collect::<Vec<_>>();
    for client in clients {
        let response = client.join().expect("client thread");
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    }
}
