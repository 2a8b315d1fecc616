//! Severity categories for per-node check results.
//!
//! Every check a node goes through (reachability probe, Slurm state, power
//! state, daemon status) is reduced to one of these categories, which drive
//! both report coloring and exit semantics. The ordinal values form a total
//! order used only for severity bucketing, never for arithmetic.

use owo_colors::OwoColorize;

/// Severity category of a single check result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum Category {
    #[default]
    Unknown = 0,
    Down = 1,
    Error = 2,
    Warn = 3,
    Busy = 4,
    Good = 5,
    Passive = 6,
}

/// Color class a category renders with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorClass {
    /// Red: needs attention (UNKNOWN, DOWN, ERROR)
    Alert,
    /// Yellow: degraded or occupied (WARN, BUSY)
    Caution,
    /// Green/cyan: healthy (GOOD, PASSIVE)
    Normal,
}

impl Category {
    #[must_use]
    pub fn color_class(self) -> ColorClass {
        match self {
            Category::Unknown | Category::Down | Category::Error => ColorClass::Alert,
            Category::Warn | Category::Busy => ColorClass::Caution,
            Category::Good | Category::Passive => ColorClass::Normal,
        }
    }

    /// Paint a cell according to this category's color class.
    #[must_use]
    pub fn paint(self, text: &str) -> String {
        match self.color_class() {
            ColorClass::Alert => text.red().to_string(),
            ColorClass::Caution => text.yellow().to_string(),
            ColorClass::Normal => match self {
                Category::Passive => text.cyan().to_string(),
                _ => text.green().to_string(),
            },
        }
    }
}
