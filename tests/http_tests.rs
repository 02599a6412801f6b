use std::fs;
use std::path::PathBuf;

use reactor_httpd::buffer::Buffer;
use reactor_httpd::config::AppConfig;
use reactor_httpd::date;
use reactor_httpd::http::request::Request;
use reactor_httpd::http::response::Response;

fn scratch_root(name: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("reactor_httpd_test_{name}_{}", std::process::id()));
    let _ = fs::remove_dir_all(&root);
    fs::create_dir_all(&root).unwrap();
    root
}

fn cfg_with_root(root: &PathBuf) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.document_root = root.to_str().unwrap().to_string();
    cfg
}

fn parse(raw: &[u8]) -> Request {
    let mut buf = Buffer::with_capacity(128);
    buf.append(raw);
    let mut req = Request::new();
    req.parse(&mut buf);
    req
}

#[test]
fn static_get_returns_200_with_exact_content_length() {
    let root = scratch_root("s1");
    fs::write(root.join("index.html"), "HELLO").unwrap();

    let req = parse(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(req.path, "/index.html");

    let cfg = cfg_with_root(&root);
    let date_cache = date::start();
    let response = Response::build(&cfg, &req.path, false, &date_cache);

    assert_eq!(response.status, 200);
    let headers = String::from_utf8_lossy(&response.header_bytes);
    assert!(headers.contains("Content-Type: text/html"));
    assert!(headers.contains("Content-length: 5"));
    assert_eq!(response.body_slice(), b"HELLO");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn missing_file_serves_404_page() {
    let root = scratch_root("s2");
    fs::write(root.join("404.html"), "NF").unwrap();

    let req = parse(b"GET /missing.html HTTP/1.1\r\n\r\n");
    let cfg = cfg_with_root(&root);
    let date_cache = date::start();
    let response = Response::build(&cfg, &req.path, false, &date_cache);

    assert_eq!(response.status, 404);
    assert_eq!(response.body_slice(), b"NF");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn malformed_request_line_is_rejected() {
    let mut buf = Buffer::with_capacity(32);
    buf.append(b"FOO\r\n\r\n");
    let mut req = Request::new();
    assert!(!req.parse(&mut buf));
}

#[test]
fn keep_alive_response_header_reflects_connection() {
    let root = scratch_root("s3");
    fs::write(root.join("a.png"), [0u8, 1, 2, 3]).unwrap();

    let req = parse(b"GET /a.png HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
    assert!(req.keep_alive());

    let cfg = cfg_with_root(&root);
    let date_cache = date::start();
    let response = Response::build(&cfg, &req.path, req.keep_alive(), &date_cache);
    let headers = String::from_utf8_lossy(&response.header_bytes);
    assert!(headers.contains("Connection: keep-alive"));

    let _ = fs::remove_dir_all(&root);
}
