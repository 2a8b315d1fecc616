//! Classification of raw check signals into severity categories.
//!
//! Every function here is pure and total: any input string maps to exactly
//! one [`Category`], unknown tokens fall through to `Unknown`, nothing ever
//! panics. Rules are evaluated first match wins.

use crate::models::Category;

/// Slurm states that mean the node is free for work.
pub const IDLE_STATES: &[&str] = &["IDLE"];

/// Slurm states that mean the node is occupied but healthy.
pub const WORKING_STATES: &[&str] = &[
    "ALLOCATED",
    "ALLOCATED+",
    "COMPLETING",
    "MIXED",
    "RESERVED",
];

/// Trailing one-character tags Slurm appends to flag a problem
/// (not responding, powering down, etc.). Any of these overrides the
/// idle/working classification.
pub const ERROR_TAGS: &[char] = &['*', '~', '#', '$', '@'];

/// Sentinels the Slurm resolver substitutes when transport to Slurm failed.
const SLURM_TRANSPORT_FAILURES: &[&str] = &["TIME OUT", "SLURM REDIRECT"];

/// Classify a derived Slurm status string (tokens joined by `/`).
#[must_use]
pub fn classify_slurm_status(status: &str) -> Category {
    let upper = status.to_uppercase();

    if status.len() > 1 {
        if let Some(last) = status.chars().last() {
            if ERROR_TAGS.contains(&last) {
                return Category::Error;
            }
        }
    }
    if IDLE_STATES.contains(&upper.as_str()) {
        return Category::Good;
    }
    if WORKING_STATES.contains(&upper.as_str()) {
        return Category::Busy;
    }
    if SLURM_TRANSPORT_FAILURES.contains(&upper.as_str()) {
        return Category::Down;
    }
    Category::Unknown
}

/// Classify a reachability probe status code (UNKN/DOWN/AVAIL/NO_FS/OK).
#[must_use]
pub fn classify_health_status(status: &str) -> Category {
    match status {
        "OK" => Category::Good,
        "AVAIL" => Category::Warn,
        "NO_FS" => Category::Error,
        "DOWN" => Category::Down,
        _ => Category::Unknown,
    }
}

/// Classify a power outcome message from the dispatcher.
///
/// `on`/`ok` means powered and reachable; `off` is a caution, not an error;
/// anything that came out of the daemon's `failed` bucket is an error.
#[must_use]
pub fn classify_power_status(status: &str, failed: bool) -> Category {
    if failed {
        return Category::Error;
    }
    match status.to_uppercase().as_str() {
        "ON" | "OK" => Category::Good,
        "OFF" => Category::Warn,
        "" => Category::Unknown,
        _ => Category::Unknown,
    }
}

/// Classify the daemon inventory status string for a node.
///
/// These are free-form provisioning states; anything not obviously good or
/// bad renders as informational.
#[must_use]
pub fn classify_daemon_status(status: &str) -> Category {
    let upper = status.to_uppercase();
    if upper.is_empty() {
        return Category::Unknown;
    }
    if upper.contains("ERROR") || upper.contains("FAIL") {
        return Category::Error;
    }
    if upper.contains("OK") || upper.contains("PASS") {
        return Category::Good;
    }
    Category::Passive
}
