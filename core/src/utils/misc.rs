use chrono::{Local, LocalResult, TimeZone};
use std::time::{SystemTime, UNIX_EPOCH};

/// Day key assigned to timestamps that no local calendar date can represent.
/// It never equals a real day key, so such rows fall to the next purge.
const OUT_OF_RANGE_DAY_KEY: &str = "0000-00-00";

/// Every error that is counted by the metrics layer exposes a short
/// static name, usually derived via `strum_macros::IntoStaticStr`.
pub trait Typename {
    fn typename(&self) -> &'static str;
}

/// Milliseconds since the unix epoch.
pub fn get_unix_millis_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Seconds since the unix epoch.
pub fn get_unix_secs_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Calendar date of `ts_ms` in the machine's local timezone, as `YYYY-MM-DD`.
pub fn day_key_of(ts_ms: u64) -> String {
    let Ok(ts_ms) = i64::try_from(ts_ms) else {
        return OUT_OF_RANGE_DAY_KEY.to_string();
    };
    match Local.timestamp_millis_opt(ts_ms) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.format("%Y-%m-%d").to_string(),
        LocalResult::None => OUT_OF_RANGE_DAY_KEY.to_string(),
    }
}

/// Today's day key in local time.
pub fn today_day_key() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// At most `max` characters, cut on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
