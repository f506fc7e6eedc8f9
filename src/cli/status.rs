//! Single-line status rendering for recording and playback.
//!
//! Pure string builders; the binary owns the terminal and decides when to
//! redraw.

use crate::control::{PlayerStats, RecorderStats};

const MIN_BAR_WIDTH: usize = 10;
const MAX_BAR_WIDTH: usize = 60;

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{size:.0} {}", UNITS[unit])
    } else {
        format!("{size:.2} {}", UNITS[unit])
    }
}

/// One-line recording status, abbreviated in stages to fit `width` columns.
pub fn record_status_line(paused: bool, stats: &RecorderStats, width: usize) -> String {
    let status = if paused { "PAUSED" } else { "REC" };
    let size = format_bytes(stats.bytes_written);

    let full = format!(
        "{status} | rcv {} | wr {} | drop {} | {size}",
        stats.messages_received, stats.messages_written, stats.messages_dropped,
    );
    if full.len() + 5 <= width {
        return full;
    }
    let brief = format!(
        "{status} | {}/{} | {size}",
        stats.messages_written, stats.messages_received,
    );
    if brief.len() + 5 <= width {
        return brief;
    }
    format!("{status} | {} | {size}", stats.messages_written)
}

/// One-line playback status with a progress bar sized to the terminal.
pub fn playback_status_line(stats: &PlayerStats, paused: bool, width: usize) -> String {
    let icon = if paused { "|| " } else { "> " };
    let time_str = format!(
        "{:.1}/{:.1}s",
        stats.position_ns as f64 / 1e9,
        stats.duration_ns as f64 / 1e9,
    );
    let speed_str = if stats.speed > 0.0 {
        format!("{:.1}x", stats.speed)
    } else {
        "MAX".to_string()
    };
    let shown = (stats.current_message + 1).min(stats.total_messages.max(1));
    let msg_str = format!("{shown}/{}", stats.total_messages);

    let fixed = icon.len() + "PLAYBACK [] ".len() + time_str.len() + speed_str.len() + msg_str.len() + 2;
    let bar_width = width
        .saturating_sub(fixed + 2)
        .clamp(MIN_BAR_WIDTH, MAX_BAR_WIDTH);

    let progress = if stats.total_messages == 0 {
        0.0
    } else {
        stats.current_message as f64 / stats.total_messages as f64
    };
    let filled = ((progress * bar_width as f64) as usize).min(bar_width);
    let mut bar = "=".repeat(filled);
    if filled < bar_width {
        bar.push('|');
        bar.push_str(&" ".repeat(bar_width - filled - 1));
    }

    format!("{icon}PLAYBACK [{bar}] {time_str} {speed_str} {msg_str}")
}
