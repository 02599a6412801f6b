use std::io::{Read, Write};
use std::net::SocketAddr;
use std::process::{Command, Stdio};

use crate::http::request::Request;

const READ_CHUNK: usize = 4096;

/// Built from the request/connection context, installed verbatim as the
/// CGI child's environment.
pub struct CgiEnv<'a> {
    pub script_path: &'a str,
    pub path_info: &'a str,
    pub query_string: &'a str,
    pub server_addr: SocketAddr,
    pub peer_addr: SocketAddr,
}

/// Runs `python3 <script>`, feeding the request body to stdin and capturing
/// stdout, per the fork/pipe model. Returns the raw HTTP response bytes to
/// write to the client, status already folded in.
pub fn run(req: &Request, env: CgiEnv) -> Vec<u8> {
    let mut command = Command::new("python3");
    command
        .arg(env.script_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_clear()
        .envs(std::env::vars())
        .env("GATEWAY_INTERFACE", "CGI/1.1")
        .env("SERVER_PROTOCOL", "HTTP/1.1")
        .env("REQUEST_METHOD", &req.method)
        .env("SCRIPT_NAME", env.script_path)
        .env("PATH_INFO", env.path_info)
        .env("QUERY_STRING", env.query_string)
        .env("SERVER_NAME", env.server_addr.ip().to_string())
        .env("SERVER_PORT", env.server_addr.port().to_string())
        .env("REMOTE_ADDR", env.peer_addr.ip().to_string())
        .env(
            "HTTP_USER_AGENT",
            req.headers.get("User-Agent").cloned().unwrap_or_default(),
        );

    if req.method == "POST" {
        command.env("CONTENT_TYPE", "application/x-www-form-urlencoded");
        command.env("CONTENT_LENGTH", req.body.len().to_string());
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => return spawn_failure_page(&err.to_string()),
    };

    if !req.body.is_empty() {
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(&req.body);
        }
    }
    // Drop stdin (closing it) even for an empty body, so scripts reading to
    // EOF on stdin don't hang.
    drop(child.stdin.take());

    let mut output = Vec::new();
    if let Some(mut stdout) = child.stdout.take() {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match stdout.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => output.extend_from_slice(&chunk[..n]),
                Err(_) => break,
            }
        }
    }

    let _ = child.wait();

    compose_response(&output)
}

/// If the captured output already declares `Content-Type:`, only the status
/// line is prefixed; otherwise a full header block is synthesized.
fn compose_response(output: &[u8]) -> Vec<u8> {
    let has_content_type = contains(output, b"Content-Type:");

    if has_content_type {
        let mut response = b"HTTP/1.1 200 OK\r\n".to_vec();
        response.extend_from_slice(output);
        response
    } else {
        let mut response = Vec::with_capacity(output.len() + 128);
        response.extend_from_slice(b"HTTP/1.1 200 OK\r\n");
        response.extend_from_slice(b"Content-Type: text/html\r\n");
        response.extend_from_slice(b"Connection: close\r\n");
        response
            .extend_from_slice(format!("Content-Length: {}\r\n\r\n", output.len()).as_bytes());
        response.extend_from_slice(output);
        response
    }
}

fn spawn_failure_page(diagnostic: &str) -> Vec<u8> {
    let body = format!(
        "<html><body><h1>500 Internal Server Error</h1><p>CGI spawn failed: {diagnostic}</p></body></html>"
    );
    let mut response = Vec::with_capacity(body.len() + 128);
    response.extend_from_slice(b"HTTP/1.1 500 Internal Server Error\r\n");
    response.extend_from_slice(b"Content-Type: text/html\r\n");
    response.extend_from_slice(b"Connection: close\r\n");
    response.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    response.extend_from_slice(body.as_bytes());
    response
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_response_prefixes_status_only_when_content_type_present() {
        let out = b"Content-Type: text/plain\r\n\r\nabc".to_vec();
        let response = compose_response(&out);
        assert!(response.starts_with(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nabc"));
    }

    #[test]
    fn compose_response_synthesizes_headers_when_absent() {
        let out = b"abc".to_vec();
        let response = compose_response(&out);
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 3"));
        assert!(text.ends_with("abc"));
    }

    #[test]
    fn spawn_failure_produces_500_page() {
        let response = spawn_failure_page("No such file or directory");
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(text.contains("No such file or directory"));
    }
}
