use crate::config::parser::{ConfigParser, FromYaml, ParseResult};
use std::collections::HashMap;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_TRIGGER_MODE: u8 = 3;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_DOCUMENT_ROOT: &str = "./resources";
pub const DEFAULT_CGI_DIR: &str = "./cgi-bin";
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_POLLER_CAPACITY: usize = 1024;

/// Startup configuration for the whole server. One listener, one document root --
/// virtual hosts and multi-server blocks are out of scope (see spec §1).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Bit 0: connections edge-triggered. Bit 1: listener edge-triggered.
    pub trigger_mode: u8,
    /// 0 disables idle-connection reaping entirely.
    pub idle_timeout_ms: u64,
    pub linger: bool,
    pub workers: usize,
    pub document_root: String,
    pub cgi_dir: String,
    pub queue_capacity: usize,
    pub poller_capacity: usize,
    pub error_pages: HashMap<u16, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            trigger_mode: DEFAULT_TRIGGER_MODE,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            linger: false,
            workers: DEFAULT_WORKERS,
            document_root: DEFAULT_DOCUMENT_ROOT.to_string(),
            cgi_dir: DEFAULT_CGI_DIR.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poller_capacity: DEFAULT_POLLER_CAPACITY,
            error_pages: HashMap::new(),
        }
    }
}

impl FromYaml for AppConfig {
    fn from_yaml(parser: &mut ConfigParser, min_indent: usize) -> ParseResult<Self> {
        let mut cfg = AppConfig::default();

        while let Some(key) = parser.next_map_key(min_indent)? {
            match key.as_str() {
                "host" => cfg.host = String::from_yaml(parser, min_indent)?,
                "port" => cfg.port = u16::from_yaml(parser, min_indent)?,
                "trigger_mode" => cfg.trigger_mode = u8::from_yaml(parser, min_indent)?,
                "idle_timeout_ms" => cfg.idle_timeout_ms = u64::from_yaml(parser, min_indent)?,
                "linger" => cfg.linger = bool::from_yaml(parser, min_indent)?,
                "workers" => cfg.workers = usize::from_yaml(parser, min_indent)?,
                "document_root" => cfg.document_root = String::from_yaml(parser, min_indent)?,
                "cgi_dir" => cfg.cgi_dir = String::from_yaml(parser, min_indent)?,
                "queue_capacity" => cfg.queue_capacity = usize::from_yaml(parser, min_indent)?,
                "poller_capacity" => cfg.poller_capacity = usize::from_yaml(parser, min_indent)?,
                "error_pages" => {
                    cfg.error_pages = HashMap::<u16, String>::from_yaml(parser, min_indent)?
                }
                other => {
                    return Err(crate::config::parser::ConfigError {
                        message: format!("unknown config key '{}'", other),
                        loc: parser.peek_loc(),
                        context: Vec::new(),
                    });
                }
            }
        }

        Ok(cfg)
    }
}

impl AppConfig {
    pub fn error_page_path(&self, code: u16) -> String {
        self.error_pages
            .get(&code)
            .cloned()
            .unwrap_or_else(|| format!("/{}.html", code))
    }
}
