//! Cached HTTP `Date` header values.
//!
//! Formatting an IMF-fixdate on every response is wasteful under load, so the
//! formatted value is cached and refreshed at most once per update interval.

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::HeaderValue;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::{Duration, Instant};

static DATE_SERVICE: Lazy<DateService> = Lazy::new(|| DateService::new_with_update_interval(Duration::from_millis(800)));

/// Keeps the current HTTP date string, refreshed on access once stale.
#[derive(Debug)]
pub struct DateService {
    current: ArcSwap<CachedDate>,
    update_interval: Duration,
}

#[derive(Debug)]
struct CachedDate {
    value: HeaderValue,
    created_at: Instant,
}

impl DateService {
    /// Returns the process-wide instance.
    pub fn get_global_instance() -> &'static DateService {
        &DATE_SERVICE
    }

    fn new_with_update_interval(update_interval: Duration) -> Self {
        Self { current: ArcSwap::from_pointee(CachedDate::now()), update_interval }
    }

    /// The current date as a header value.
    pub fn http_date(&self) -> HeaderValue {
        let cached = self.current.load();
        if cached.created_at.elapsed() < self.update_interval {
            return cached.value.clone();
        }

        let fresh = Arc::new(CachedDate::now());
        let value = fresh.value.clone();
        self.current.store(fresh);
        value
    }
}

impl CachedDate {
    fn now() -> Self {
        let mut buf = faf_http_date::get_date_buff_no_key();
        faf_http_date::get_date_no_key(&mut buf);
        let value = HeaderValue::from_maybe_shared(Bytes::from_owner(buf))
            .unwrap_or_else(|_| HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"));
        Self { value, created_at: Instant::now() }
    }
}
