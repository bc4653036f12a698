/// Renders a duration in seconds as `Hh Mm SSs`, e.g. `0h 5m 00s`.
///
/// Hours and minutes are unpadded, seconds are zero-padded to two
/// digits. Negative input is clamped to zero; durations are never
/// negative in normal operation.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{}h {}m {:02}s", hours, minutes, secs)
}
