//! Tiny HTTP/1.1 origin for download tests.
//!
//! Serves one fixed payload over HEAD and GET with byte-range support, plus
//! two failure levers: a budget of 503 responses for retry tests and a pacing
//! delay that keeps transfers slow enough to pause or cancel mid-flight.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Bytes written per flush when pacing is enabled.
const PACE_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, Default)]
pub struct RangeServerOptions {
    /// Answer every Range request with 200 and the whole payload.
    pub ignore_range_requests: bool,
    /// Leave `Accept-Ranges` out of responses even when ranges work.
    pub hide_accept_ranges: bool,
    /// Budget of GETs answered with 503 before the origin recovers.
    pub fail_gets: usize,
    /// Sleep between payload chunks, slowing the transfer down.
    pub chunk_delay: Option<Duration>,
}

/// Serve `payload` from a background thread; returns the base URL. The
/// listener lives until the test process exits.
pub fn start(payload: Vec<u8>) -> String {
    start_with_options(payload, RangeServerOptions::default())
}

pub fn start_with_options(payload: Vec<u8>, opts: RangeServerOptions) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let payload = Arc::new(payload);
    let failures = Arc::new(AtomicUsize::new(opts.fail_gets));
    thread::spawn(move || {
        for conn in listener.incoming().flatten() {
            let payload = Arc::clone(&payload);
            let failures = Arc::clone(&failures);
            thread::spawn(move || serve(conn, &payload, opts, &failures));
        }
    });
    format!("http://127.0.0.1:{}/", port)
}

struct Request {
    method: String,
    /// `(start, end_inclusive)`; an open-ended `bytes=N-` leaves end `None`.
    range: Option<(u64, Option<u64>)>,
}

fn serve(mut conn: TcpStream, payload: &[u8], opts: RangeServerOptions, failures: &AtomicUsize) {
    let _ = conn.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = conn.set_write_timeout(Some(Duration::from_secs(5)));
    let Some(request) = read_request(&mut conn) else {
        return;
    };

    let total = payload.len() as u64;
    let ranges_work = !opts.ignore_range_requests;
    let mut base_headers: Vec<String> = Vec::new();
    if ranges_work && !opts.hide_accept_ranges {
        base_headers.push("Accept-Ranges: bytes".to_string());
    }

    if request.method.eq_ignore_ascii_case("HEAD") {
        respond(&mut conn, "200 OK", &base_headers, total, &[], None);
        return;
    }
    if !request.method.eq_ignore_ascii_case("GET") {
        respond(&mut conn, "405 Method Not Allowed", &[], 0, &[], None);
        return;
    }

    if failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
    {
        respond(&mut conn, "503 Service Unavailable", &[], 0, &[], None);
        return;
    }

    match request.range.filter(|_| ranges_work) {
        None => respond(
            &mut conn,
            "200 OK",
            &base_headers,
            total,
            payload,
            opts.chunk_delay,
        ),
        Some((start, end)) if start < total => {
            let end = end.map_or(total - 1, |e| e.min(total - 1));
            let window = &payload[start as usize..=end as usize];
            let mut headers = base_headers;
            headers.push(format!("Content-Range: bytes {start}-{end}/{total}"));
            respond(
                &mut conn,
                "206 Partial Content",
                &headers,
                window.len() as u64,
                window,
                opts.chunk_delay,
            );
        }
        Some(_) => {
            let headers = vec![format!("Content-Range: bytes */{total}")];
            respond(&mut conn, "416 Range Not Satisfiable", &headers, 0, &[], None);
        }
    }
}

fn read_request(conn: &mut TcpStream) -> Option<Request> {
    let mut reader = BufReader::new(conn.try_clone().ok()?);

    let mut start_line = String::new();
    reader.read_line(&mut start_line).ok()?;
    let method = start_line.split_whitespace().next()?.to_string();

    let mut range = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).ok()? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                range = parse_byte_range(value.trim());
            }
        }
    }
    Some(Request { method, range })
}

fn parse_byte_range(value: &str) -> Option<(u64, Option<u64>)> {
    let spec = value.strip_prefix("bytes=")?;
    let (from, to) = spec.split_once('-')?;
    let start = from.trim().parse().ok()?;
    let end = to.trim().parse().ok();
    Some((start, end))
}

/// Write a complete response. `content_length` is declared separately from
/// `body` so HEAD can state the payload size without sending it.
fn respond(
    conn: &mut TcpStream,
    status: &str,
    extra_headers: &[String],
    content_length: u64,
    body: &[u8],
    pace: Option<Duration>,
) {
    let mut head = format!("HTTP/1.1 {status}\r\nContent-Length: {content_length}\r\n");
    for header in extra_headers {
        head.push_str(header);
        head.push_str("\r\n");
    }
    head.push_str("Connection: close\r\n\r\n");
    if conn.write_all(head.as_bytes()).is_err() {
        return;
    }

    match pace {
        None => {
            let _ = conn.write_all(body);
        }
        Some(delay) => {
            for piece in body.chunks(PACE_CHUNK) {
                if conn.write_all(piece).is_err() {
                    return;
                }
                let _ = conn.flush();
                thread::sleep(delay);
            }
        }
    }
}
