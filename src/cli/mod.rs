//! Helpers for the command-line binary: status-line rendering and the
//! defaults the flags fall back to.

pub mod status;

use std::path::PathBuf;

use time::macros::format_description;
use time::OffsetDateTime;

use crate::bus::nats::DEFAULT_URL;

/// Broker URL resolution order: explicit flag, then `NATS_URL`, then the
/// default local server.
pub fn resolve_server_url(flag: Option<&str>) -> String {
    pick_server_url(flag, std::env::var("NATS_URL").ok())
}

fn pick_server_url(flag: Option<&str>, env: Option<String>) -> String {
    if let Some(url) = flag {
        if !url.is_empty() {
            return url.to_string();
        }
    }
    if let Some(url) = env {
        if !url.is_empty() {
            return url;
        }
    }
    DEFAULT_URL.to_string()
}

/// `capture_<local timestamp>.zet` in the working directory.
pub fn default_capture_path() -> PathBuf {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let format = format_description!("[year]_[month]_[day]_[hour][minute][second]");
    let stamp = now
        .format(&format)
        .unwrap_or_else(|_| String::from("capture"));
    PathBuf::from(format!("capture_{stamp}.zet"))
}
