use crate::config::types::AppConfig;
use std::path::Path;

/// Sanity-checks a loaded config against the invariants the reactor relies on.
/// Returns the list of problems found; an empty vec means the config is safe to run.
pub fn validate_config(cfg: &AppConfig) -> Vec<String> {
    let mut problems = Vec::new();

    if !(1024..=65535).contains(&cfg.port) {
        problems.push(format!(
            "port {} is outside the allowed range 1024-65535",
            cfg.port
        ));
    }

    if cfg.workers == 0 {
        problems.push("workers must be at least 1".to_string());
    }

    if !cfg.queue_capacity.is_power_of_two() {
        problems.push(format!(
            "queue_capacity {} must be a power of two",
            cfg.queue_capacity
        ));
    }

    let root = Path::new(&cfg.document_root);
    if std::fs::read_dir(root).is_err() {
        problems.push(format!(
            "document_root '{}' is not a readable directory",
            cfg.document_root
        ));
    }

    for code in [400u16, 403, 404] {
        let page = cfg.error_page_path(code);
        let full = root.join(page.trim_start_matches('/'));
        if std::fs::metadata(&full).is_err() {
            problems.push(format!(
                "error page for {} ('{}') does not exist",
                code,
                full.display()
            ));
        }
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_low_port() {
        let mut cfg = AppConfig { port: 80, ..AppConfig::default() };
        cfg.document_root = ".".to_string();
        cfg.error_pages.clear();
        let problems = validate_config(&cfg);
        assert!(problems.iter().any(|p| p.contains("port")));
    }

    #[test]
    fn rejects_non_power_of_two_queue() {
        let mut cfg = AppConfig::default();
        cfg.queue_capacity = 1000;
        cfg.document_root = ".".to_string();
        let problems = validate_config(&cfg);
        assert!(problems.iter().any(|p| p.contains("queue_capacity")));
    }
}
