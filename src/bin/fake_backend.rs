//! Stand-in inference server for the integration suite under `tests/`.
//!
//! Listens on `127.0.0.1:<port>` and answers `GET /health` with `200` once
//! `--health-delay-ms` has elapsed since startup (`503` before that), and
//! everything else with a static `200` after `--response-delay-ms` (default
//! `0`) has elapsed, so tests can hold a request in flight. `--fail-after-ms`,
//! if given, exits the process with status `1` after that delay, simulating a
//! backend crash for the auto-restart scenarios. Recognizes no other flags —
//! every backend's real argv (`--model`, `--host`, ...) is passed through and
//! simply ignored.

use std::env;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

fn main() {
    let mut port: u16 = 0;
    let mut health_delay_ms: u64 = 0;
    let mut response_delay_ms: u64 = 0;
    let mut fail_after_ms: Option<u64> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--port" => port = args.next().and_then(|v| v.parse().ok()).unwrap_or(0),
            "--health-delay-ms" => health_delay_ms = args.next().and_then(|v| v.parse().ok()).unwrap_or(0),
            "--response-delay-ms" => response_delay_ms = args.next().and_then(|v| v.parse().ok()).unwrap_or(0),
            "--fail-after-ms" => fail_after_ms = args.next().and_then(|v| v.parse().ok()),
            _ => {}
        }
    }

    if let Some(delay) = fail_after_ms {
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(delay));
            std::process::exit(1);
        });
    }

    let listener = TcpListener::bind(("127.0.0.1", port)).expect("fake_backend failed to bind");
    let start = Instant::now();

    for stream in listener.incoming() {
        let Ok(stream) = stream else { continue };
        let healthy = start.elapsed() >= Duration::from_millis(health_delay_ms);
        // One thread per connection: a slow `--response-delay-ms` request
        // must not block the health-check poller's own connections.
        std::thread::spawn(move || handle(stream, healthy, response_delay_ms));
    }
}

fn handle(mut stream: TcpStream, healthy: bool, response_delay_ms: u64) {
    let mut buf = [0u8; 2048];
    let read = stream.read(&mut buf).unwrap_or(0);
    let request = String::from_utf8_lossy(&buf[..read]);
    let is_health = request.starts_with("GET /health");

    if !is_health && response_delay_ms > 0 {
        std::thread::sleep(Duration::from_millis(response_delay_ms));
    }

    let (status_line, body) = match (is_health, healthy) {
        (true, true) => ("HTTP/1.1 200 OK", "ok"),
        (true, false) => ("HTTP/1.1 503 Service Unavailable", "not ready"),
        (false, _) => ("HTTP/1.1 200 OK", "{}"),
    };

    let response = format!("{status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}", body.len(), body);
    let _ = stream.write_all(response.as_bytes());
}
