//! Minimal HTTP/1.1 server answering HEAD and GET for integration tests.
//!
//! Each path has its own body and, optionally, a forced status for HEAD or
//! GET. Unknown paths get 404. Every response closes the connection.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Route {
    pub body: Vec<u8>,
    pub head_status: u16,
    pub get_status: u16,
}

impl Route {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            body,
            head_status: 200,
            get_status: 200,
        }
    }

    pub fn head_status(mut self, status: u16) -> Self {
        self.head_status = status;
        self
    }

    pub fn get_status(mut self, status: u16) -> Self {
        self.get_status = status;
        self
    }
}

/// Starts a server in a background thread. Returns the base URL without a
/// trailing slash (e.g. "http://127.0.0.1:12345"). Runs until the process exits.
pub fn start(routes: Vec<(&str, Route)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let routes: Arc<HashMap<String, Route>> = Arc::new(
        routes
            .into_iter()
            .map(|(path, route)| (path.to_string(), route))
            .collect(),
    );
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let routes = Arc::clone(&routes);
            thread::spawn(move || handle(stream, &routes));
        }
    });
    format!("http://127.0.0.1:{}", port)
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn handle(mut stream: TcpStream, routes: &HashMap<String, Route>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let mut request_line = request.lines().next().unwrap_or("").split_whitespace();
    let method = request_line.next().unwrap_or("");
    let path = request_line.next().unwrap_or("/");

    let route = match routes.get(path) {
        Some(route) => route,
        None => {
            let _ = stream.write_all(
                b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
            return;
        }
    };

    let (status, send_body) = if method.eq_ignore_ascii_case("HEAD") {
        (route.head_status, false)
    } else if method.eq_ignore_ascii_case("GET") {
        (route.get_status, route.get_status == 200)
    } else {
        (405, false)
    };
    let length = if status == 200 { route.body.len() } else { 0 };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason(status),
        length
    );
    let _ = stream.write_all(response.as_bytes());
    if send_body {
        let _ = stream.write_all(&route.body);
    }
}
