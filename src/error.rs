use core::fmt;
use std::{
    error::Error,
    fmt::{Debug, Display, Formatter},
};

use crate::config::ConfigError;

/// Top-level error type for anything that can fail during startup: binding the
/// listener, raising `RLIMIT_NOFILE`, loading and parsing `config.yaml`.
///
/// Connection-local failures (a bad request line, a missing file, a CGI spawn
/// failure) never become a `CleanError` -- they turn into an HTTP response and
/// stay inside the reactor, per the propagation policy of the request parser and
/// response builder.
pub struct CleanError(pub Box<dyn Error>);

impl Debug for CleanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "\r\x1b[K{}", self)
    }
}

impl Display for CleanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\x1b[31mERROR\x1b[0m: {}", self.0)
    }
}

impl Error for CleanError {}

impl From<ConfigError> for CleanError {
    fn from(e: ConfigError) -> Self {
        CleanError(Box::new(e))
    }
}

impl From<std::io::Error> for CleanError {
    fn from(e: std::io::Error) -> Self {
        CleanError(Box::new(e))
    }
}

impl From<std::net::AddrParseError> for CleanError {
    fn from(e: std::net::AddrParseError) -> Self {
        CleanError(Box::new(e))
    }
}

impl From<nix::Error> for CleanError {
    fn from(e: nix::Error) -> Self {
        CleanError(Box::new(e))
    }
}

impl From<String> for CleanError {
    fn from(s: String) -> Self {
        CleanError(Box::new(std::io::Error::new(std::io::ErrorKind::Other, s)))
    }
}

impl From<&str> for CleanError {
    fn from(s: &str) -> Self {
        CleanError(Box::new(std::io::Error::new(std::io::ErrorKind::Other, s.to_string())))
    }
}

pub type Result<T> = std::result::Result<T, CleanError>;
