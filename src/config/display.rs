use crate::config::types::AppConfig;
use std::fmt;

impl fmt::Display for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  \x1b[38;5;244m{}\x1b[0m", "\u{2500}".repeat(48))?;
        writeln!(
            f,
            "  \x1b[1;34m\u{29bf}\x1b[0m \x1b[1;37mListening:\x1b[0m    \x1b[32m{}:{}\x1b[0m",
            self.host, self.port
        )?;
        writeln!(
            f,
            "  \x1b[1;34m\u{29bf}\x1b[0m \x1b[1;37mTrigger mode:\x1b[0m \x1b[36m{:#04b}\x1b[0m",
            self.trigger_mode
        )?;
        writeln!(
            f,
            "  \x1b[1;34m\u{29bf}\x1b[0m \x1b[1;37mIdle timeout:\x1b[0m \x1b[33m{} ms\x1b[0m",
            self.idle_timeout_ms
        )?;
        writeln!(
            f,
            "  \x1b[1;34m\u{29bf}\x1b[0m \x1b[1;37mWorkers:\x1b[0m      \x1b[32m{}\x1b[0m",
            self.workers
        )?;
        writeln!(
            f,
            "  \x1b[1;34m\u{29bf}\x1b[0m \x1b[1;37mDocument root:\x1b[0m \x1b[36m{}\x1b[0m",
            self.document_root
        )?;
        writeln!(
            f,
            "  \x1b[1;34m\u{29bf}\x1b[0m \x1b[1;37mCGI dir:\x1b[0m      \x1b[36m{}\x1b[0m",
            self.cgi_dir
        )?;
        if !self.error_pages.is_empty() {
            writeln!(f, "  \x1b[1;34m\u{29bf}\x1b[0m \x1b[1;37mError pages:\x1b[0m")?;
            let mut codes: Vec<_> = self.error_pages.keys().collect();
            codes.sort();
            for code in codes {
                writeln!(
                    f,
                    "    \x1b[38;5;244m{:4}\x1b[0m \u{2192} \x1b[31m{}\x1b[0m",
                    code, self.error_pages[code]
                )?;
            }
        }
        Ok(())
    }
}
