use reactor_httpd::config::{validate_config, AppConfig, FromYaml};

const SAMPLE: &str = "\
host: 0.0.0.0
port: 9090
trigger_mode: 1
idle_timeout_ms: 5000
linger: true
workers: 8
document_root: ./www
cgi_dir: ./scripts
queue_capacity: 256
poller_capacity: 512
error_pages:
  400: /bad.html
  403: /forbidden.html
  404: /missing.html
";

#[test]
fn parses_a_full_document() {
    let cfg = AppConfig::from_str(SAMPLE).expect("valid config should parse");
    assert_eq!(cfg.host, "0.0.0.0");
    assert_eq!(cfg.port, 9090);
    assert_eq!(cfg.trigger_mode, 1);
    assert_eq!(cfg.idle_timeout_ms, 5000);
    assert!(cfg.linger);
    assert_eq!(cfg.workers, 8);
    assert_eq!(cfg.document_root, "./www");
    assert_eq!(cfg.cgi_dir, "./scripts");
    assert_eq!(cfg.queue_capacity, 256);
    assert_eq!(cfg.error_pages.get(&404), Some(&"/missing.html".to_string()));
}

#[test]
fn unknown_key_is_rejected() {
    let bad = "host: 0.0.0.0\nbogus_key: 1\n";
    let err = AppConfig::from_str(bad).unwrap_err();
    assert!(err.message.contains("unknown config key"));
}

#[test]
fn defaults_fail_validation_without_document_root() {
    let mut cfg = AppConfig::default();
    cfg.document_root = "/definitely/does/not/exist".to_string();
    let problems = validate_config(&cfg);
    assert!(problems.iter().any(|p| p.contains("document_root")));
}
