//! Human-readable byte counts for size-limit messages and logs.

const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

/// Format `bytes` in IEC units, keeping at most one decimal and dropping a trailing `.0`.
pub fn human_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }

    let rounded = format!("{value:.1}");
    let trimmed = rounded.strip_suffix(".0").unwrap_or(&rounded);
    format!("{trimmed} {unit}")
}
