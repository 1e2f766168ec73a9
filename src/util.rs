use chrono::Utc;

/// Wall clock in integer milliseconds; profile math runs on ms throughout.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
