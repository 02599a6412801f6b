use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, SystemTime};

/// Precomputed `Date:` header line, refreshed once a second by a dedicated
/// thread so the hot request path never calls `SystemTime::now()` or
/// formats RFC 1123 timestamps itself.
pub struct DateCache {
    buffers: [arc_swap_cell::ArcCell; 2],
    active: AtomicUsize,
}

/// A tiny single-purpose replacement for a generic arc-swap crate: we only
/// ever need to publish one `Arc<String>` and read the latest one.
mod arc_swap_cell {
    use std::sync::atomic::{AtomicPtr, Ordering};
    use std::sync::Arc;

    pub struct ArcCell(AtomicPtr<String>);

    impl ArcCell {
        pub fn new(value: Arc<String>) -> Self {
            Self(AtomicPtr::new(Arc::into_raw(value) as *mut String))
        }

        pub fn load(&self) -> Arc<String> {
            let ptr = self.0.load(Ordering::Acquire);
            let arc = unsafe { Arc::from_raw(ptr) };
            let clone = arc.clone();
            std::mem::forget(arc);
            clone
        }

        pub fn store(&self, value: Arc<String>) {
            let new_ptr = Arc::into_raw(value) as *mut String;
            let old_ptr = self.0.swap(new_ptr, Ordering::AcqRel);
            unsafe { drop(Arc::from_raw(old_ptr)) };
        }
    }

    impl Drop for ArcCell {
        fn drop(&mut self) {
            let ptr = self.0.load(Ordering::Acquire);
            unsafe { drop(Arc::from_raw(ptr)) };
        }
    }
}

impl DateCache {
    fn new() -> Self {
        let initial = Arc::new(format_now());
        Self {
            buffers: [
                arc_swap_cell::ArcCell::new(initial.clone()),
                arc_swap_cell::ArcCell::new(initial),
            ],
            active: AtomicUsize::new(0),
        }
    }

    /// Returns the current RFC 1123 date string, e.g.
    /// `Sun, 26 Jul 2026 12:00:00 GMT`.
    pub fn get(&self) -> Arc<String> {
        let idx = self.active.load(Ordering::Acquire);
        self.buffers[idx].load()
    }

    fn refresh(&self) {
        let idx = self.active.load(Ordering::Acquire);
        let next = idx ^ 1;
        self.buffers[next].store(Arc::new(format_now()));
        self.active.store(next, Ordering::Release);
    }
}

fn format_now() -> String {
    httpdate::fmt_http_date(SystemTime::now())
}

static CACHE: OnceLock<Arc<DateCache>> = OnceLock::new();

/// Starts the background refresh thread and returns the shared cache handle.
/// Safe to call more than once; the thread is only spawned on first call.
pub fn start() -> Arc<DateCache> {
    CACHE
        .get_or_init(|| {
            let cache = Arc::new(DateCache::new());
            let bg = cache.clone();
            thread::Builder::new()
                .name("date-cache".into())
                .spawn(move || loop {
                    thread::sleep(Duration::from_secs(1));
                    bg.refresh();
                })
                .expect("failed to spawn date cache thread");
            cache
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_produces_well_formed_rfc1123_date() {
        let cache = DateCache::new();
        let s = cache.get();
        assert!(s.ends_with("GMT"));
        assert_eq!(s.len(), 29);
    }

    #[test]
    fn refresh_swaps_active_buffer() {
        let cache = DateCache::new();
        let before = cache.active.load(Ordering::Acquire);
        cache.refresh();
        let after = cache.active.load(Ordering::Acquire);
        assert_ne!(before, after);
    }
}
