pub use crate::config::AppConfig;
pub use crate::error::{CleanError, Result};
pub use crate::server::Server;
