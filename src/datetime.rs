use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

/// Milliseconds since the Unix epoch, used to make blob keys and file names unique.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn parse(timestamp: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(timestamp.trim(), &Rfc3339).ok()
}

/// `dd/mm/yyyy` in the timestamp's own offset; empty when unparseable.
pub fn format_date(timestamp: &str) -> String {
    parse(timestamp)
        .and_then(|dt| dt.format(format_description!("[day]/[month]/[year]")).ok())
        .unwrap_or_default()
}

/// `HH:MM:SS` (24 hour) in the timestamp's own offset; empty when unparseable.
pub fn format_time(timestamp: &str) -> String {
    parse(timestamp)
        .and_then(|dt| dt.format(format_description!("[hour]:[minute]:[second]")).ok())
        .unwrap_or_default()
}

/// Current time as an RFC 3339 string, the shape the store uses for `created_at`.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
