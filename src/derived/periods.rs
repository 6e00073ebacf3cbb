use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Accumulation window of a derived counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Total,
    Hourly,
    #[serde(rename = "2h")]
    TwoHours,
    #[serde(rename = "4h")]
    FourHours,
    Daily,
    Yesterday,
    Monthly,
    Yearly,
}

impl Period {
    pub const CYCLE_PERIODS: [Period; 7] = [
        Period::Total,
        Period::Daily,
        Period::Yesterday,
        Period::TwoHours,
        Period::FourHours,
        Period::Monthly,
        Period::Yearly,
    ];

    pub const ENERGY_PERIODS: [Period; 8] = [
        Period::Total,
        Period::Hourly,
        Period::TwoHours,
        Period::FourHours,
        Period::Daily,
        Period::Yesterday,
        Period::Monthly,
        Period::Yearly,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Period::Total => "total",
            Period::Hourly => "hourly",
            Period::TwoHours => "2h",
            Period::FourHours => "4h",
            Period::Daily => "daily",
            Period::Yesterday => "yesterday",
            Period::Monthly => "monthly",
            Period::Yearly => "yearly",
        }
    }

    /// Periods displayed as `total − baseline`
    pub const fn has_baseline(self) -> bool {
        !matches!(self, Period::Total | Period::Yesterday)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = crate::LambdaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ENERGY_PERIODS
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| crate::LambdaError::validation("period".to_string(), format!("unknown period '{}'", s)))
    }
}

/// Displayed value of a period counter
pub fn period_value(total: f64, baseline: f64) -> f64 {
    (total - baseline).max(0.0)
}
