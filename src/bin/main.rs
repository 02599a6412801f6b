use std::fs;

use reactor_httpd::config::{validate_config, AppConfig, FromYaml};
use reactor_httpd::error::Result;
use reactor_httpd::server::Server;

const CONFIG_PATH: &str = "config.yaml";

fn main() {
    if let Err(err) = run() {
        tracing::error!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cfg = load_config()?;
    tracing::info!("{cfg}");

    let server = Server::new(cfg)?;
    server.run();
    Ok(())
}

fn load_config() -> Result<AppConfig> {
    let cfg = match fs::read_to_string(CONFIG_PATH) {
        Ok(text) => AppConfig::from_str(&text)?,
        Err(_) => {
            tracing::warn!("no {CONFIG_PATH} found, using defaults");
            AppConfig::default()
        }
    };

    let problems = validate_config(&cfg);
    if !problems.is_empty() {
        for problem in &problems {
            tracing::error!("config: {problem}");
        }
        return Err(format!("{} configuration error(s)", problems.len()).into());
    }

    Ok(cfg)
}
