use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::fs::File;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Arc;

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use std::num::NonZeroUsize;

use crate::config::AppConfig;
use crate::date::DateCache;

const MIME_CACHE_LIMIT: usize = 128;

thread_local! {
    static MIME_CACHE: RefCell<HashMap<String, &'static str>> = RefCell::new(HashMap::new());
}

fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Bad Request",
    }
}

/// Normalizes any status outside the supported set to 400, per the fixed
/// status-text table.
fn coerce_status(code: u16) -> u16 {
    match code {
        200 | 400 | 403 | 404 => code,
        _ => 400,
    }
}

fn mime_for(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    MIME_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        if let Some(found) = cache.get(&ext) {
            return *found;
        }
        let mime = lookup_mime(&ext);
        if cache.len() >= MIME_CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(ext, mime);
        mime
    })
}

fn lookup_mime(ext: &str) -> &'static str {
    match ext {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        _ => "text/plain",
    }
}

/// An `mmap`-ed file region, unmapped on drop. Shared behind `Arc` so a
/// response can hand a second scatter-gather entry to the connection's
/// writev call without the connection needing to know about mmap itself.
pub struct MappedFile {
    ptr: *mut c_void,
    len: usize,
}

// SAFETY: the mapping is read-only (`PROT_READ`) and never mutated after
// creation, so sharing the pointer across threads is sound.
unsafe impl Send for MappedFile {}
unsafe impl Sync for MappedFile {}

impl MappedFile {
    fn map(file: &File, len: usize) -> nix::Result<Self> {
        if len == 0 {
            return Ok(Self { ptr: std::ptr::null_mut(), len: 0 });
        }
        let len_nz = NonZeroUsize::new(len).expect("checked non-zero above");
        let ptr = unsafe {
            mmap(
                None,
                len_nz,
                ProtFlags::PROT_READ,
                MapFlags::MAP_PRIVATE,
                file,
                0,
            )?
        };
        Ok(Self { ptr: ptr.as_ptr(), len })
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }
        let ptr = unsafe { std::ptr::NonNull::new_unchecked(self.ptr) };
        unsafe {
            let _ = munmap(ptr, self.len);
        }
    }
}

/// Built for one request: status line and headers go in `header_bytes`; the
/// static file body (if any) is memory-mapped separately so the connection
/// can writev both without copying the file into the header buffer.
pub struct Response {
    pub status: u16,
    pub keep_alive: bool,
    pub header_bytes: Vec<u8>,
    pub body: Option<Arc<MappedFile>>,
    pub inline_body: Vec<u8>,
}

impl Response {
    /// Resolves `document_root + path`, stats it, falls back to the
    /// matching error page on 400/403/404, and mmaps the final file.
    pub fn build(cfg: &AppConfig, path: &str, keep_alive: bool, date_cache: &DateCache) -> Self {
        let document_root = &cfg.document_root;
        let mut status = 0u16;
        let mut resolved = format!("{document_root}{path}");

        match std::fs::metadata(&resolved) {
            Ok(meta) if meta.is_dir() => status = 404,
            Ok(meta) if !world_readable(&meta) => status = 403,
            Ok(_) => {}
            Err(_) => status = 404,
        }

        if status == 0 {
            status = 200;
        }

        if matches!(status, 400 | 403 | 404) {
            let page = cfg.error_page_path(status);
            resolved = format!("{document_root}{page}");
        }

        let (body, inline_body, content_length) = match File::open(&resolved) {
            Ok(file) => match file.metadata() {
                Ok(meta) => {
                    let len = meta.size() as usize;
                    match MappedFile::map(&file, len) {
                        Ok(mapped) => (Some(Arc::new(mapped)), Vec::new(), len),
                        Err(_) => {
                            let body = error_body(status);
                            let len = body.len();
                            (None, body, len)
                        }
                    }
                }
                Err(_) => {
                    let body = error_body(status);
                    let len = body.len();
                    (None, body, len)
                }
            },
            Err(_) => {
                let body = error_body(status);
                let len = body.len();
                (None, body, len)
            }
        };

        let status = coerce_status(status);
        let mut header_bytes = Vec::with_capacity(256);
        header_bytes.extend_from_slice(
            format!("HTTP/1.1 {} {}\r\n", status, status_text(status)).as_bytes(),
        );
        header_bytes.extend_from_slice(
            format!(
                "Connection: {}\r\n",
                if keep_alive { "keep-alive" } else { "close" }
            )
            .as_bytes(),
        );
        header_bytes
            .extend_from_slice(format!("Content-Type: {}\r\n", mime_for(&resolved)).as_bytes());
        header_bytes.extend_from_slice(format!("Date: {}\r\n", date_cache.get()).as_bytes());
        header_bytes.extend_from_slice(format!("Content-length: {content_length}\r\n\r\n").as_bytes());

        Self { status, keep_alive, header_bytes, body, inline_body }
    }

    /// Second scatter-gather entry for writev: the mapped file, or the
    /// inline error body when no file could be opened.
    pub fn body_slice(&self) -> &[u8] {
        match &self.body {
            Some(mapped) => mapped.as_slice(),
            None => &self.inline_body,
        }
    }
}

fn world_readable(meta: &std::fs::Metadata) -> bool {
    meta.mode() & 0o004 != 0
}

fn error_body(status: u16) -> Vec<u8> {
    format!("<html><body><h1>{} {}</h1></body></html>", status, status_text(status)).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_unknown_status_to_400() {
        assert_eq!(coerce_status(200), 200);
        assert_eq!(coerce_status(500), 400);
        assert_eq!(coerce_status(999), 400);
    }

    #[test]
    fn mime_lookup_falls_back_to_text_plain() {
        assert_eq!(lookup_mime("html"), "text/html");
        assert_eq!(lookup_mime("bin"), "text/plain");
    }
}
