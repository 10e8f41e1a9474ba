use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::data::models::PincodeSummary;

/// Colour/size bucket the map uses for a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl Tier {
    pub fn color(self) -> &'static str {
        match self {
            Tier::Low => "lightblue",
            Tier::Moderate => "lightgreen",
            Tier::High => "orange",
            Tier::VeryHigh => "red",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad(self.color())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    /// Value must exceed the threshold.
    Above,
    /// Value must reach the threshold.
    AtLeast,
}

/// Ordered (threshold, tier) steps, highest first. Values below every step are `Tier::Low`.
pub struct TierTable {
    boundary: Boundary,
    steps: &'static [(f64, Tier)],
}

impl TierTable {
    pub fn tier(&self, value: f64) -> Tier {
        self.steps
            .iter()
            .find(|(threshold, _)| match self.boundary {
                Boundary::Above => value > *threshold,
                Boundary::AtLeast => value >= *threshold,
            })
            .map(|(_, tier)| *tier)
            .unwrap_or(Tier::Low)
    }

    pub fn thresholds(&self) -> impl Iterator<Item = f64> + '_ {
        self.steps.iter().map(|(threshold, _)| *threshold)
    }
}

pub const COUNT_TIERS: TierTable = TierTable {
    boundary: Boundary::Above,
    steps: &[
        (1000.0, Tier::VeryHigh),
        (500.0, Tier::High),
        (100.0, Tier::Moderate),
    ],
};

pub const PERCENTAGE_TIERS: TierTable = TierTable {
    boundary: Boundary::AtLeast,
    steps: &[
        (10.0, Tier::VeryHigh),
        (5.0, Tier::High),
        (1.0, Tier::Moderate),
    ],
};

pub fn count_tier(count: usize) -> Tier {
    COUNT_TIERS.tier(count as f64)
}

pub fn percentage_tier(percentage: f64) -> Tier {
    PERCENTAGE_TIERS.tier(percentage)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    AbsoluteCount,
    Percentage,
}

impl DisplayMode {
    pub fn tier(self, summary: &PincodeSummary) -> Tier {
        match self {
            DisplayMode::AbsoluteCount => count_tier(summary.customer_count),
            DisplayMode::Percentage => percentage_tier(summary.percentage),
        }
    }

    /// Text shown on a marker for this mode.
    pub fn label(self, summary: &PincodeSummary) -> String {
        match self {
            DisplayMode::AbsoluteCount => summary.customer_count.to_string(),
            DisplayMode::Percentage => format_percentage(summary.percentage),
        }
    }
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "count" | "absolute" | "absolute-count" => Ok(DisplayMode::AbsoluteCount),
            "percentage" | "percent" | "pct" => Ok(DisplayMode::Percentage),
            other => Err(format!("unknown display mode '{}'", other)),
        }
    }
}

/// `"<1%"` below one percent, otherwise one decimal place.
pub fn format_percentage(percentage: f64) -> String {
    if percentage < 1.0 {
        "<1%".to_owned()
    } else {
        format!("{:.1}%", percentage)
    }
}
