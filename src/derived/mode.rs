use serde::{Deserialize, Serialize};
use std::fmt;

/// HP `operating_state` codes the engine reacts to
pub mod operating_state {
    pub const STBY: i64 = 0;
    pub const HEATING: i64 = 1;
    pub const HOT_WATER: i64 = 2;
    pub const COOLING: i64 = 3;
    pub const CIRCULATE: i64 = 4;
    pub const DEFROST: i64 = 5;
}

/// HP `state` code for "START COMPRESSOR"
pub const STATE_START_COMPRESSOR: i64 = 5;

/// Mode an energy delta is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyMode {
    Heating,
    HotWater,
    Cooling,
    Defrost,
    Stby,
}

impl EnergyMode {
    pub const ALL: [EnergyMode; 5] = [
        EnergyMode::Heating,
        EnergyMode::HotWater,
        EnergyMode::Cooling,
        EnergyMode::Defrost,
        EnergyMode::Stby,
    ];

    /// CIRCULATE and every unknown code fold into STBY
    pub fn from_operating_state(code: i64) -> Self {
        match code {
            operating_state::HEATING => EnergyMode::Heating,
            operating_state::HOT_WATER => EnergyMode::HotWater,
            operating_state::COOLING => EnergyMode::Cooling,
            operating_state::DEFROST => EnergyMode::Defrost,
            _ => EnergyMode::Stby,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            EnergyMode::Heating => "heating",
            EnergyMode::HotWater => "hot_water",
            EnergyMode::Cooling => "cooling",
            EnergyMode::Defrost => "defrost",
            EnergyMode::Stby => "stby",
        }
    }

    /// Modes with a CoP sensor
    pub const fn has_cop(self) -> bool {
        matches!(self, EnergyMode::Heating | EnergyMode::HotWater | EnergyMode::Cooling)
    }
}

impl fmt::Display for EnergyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Register a cycle counter watches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeSource {
    OperatingState,
    State,
}

impl EdgeSource {
    pub const fn register_name(self) -> &'static str {
        match self {
            EdgeSource::OperatingState => "operating_state",
            EdgeSource::State => "state",
        }
    }
}

/// Edge-counted mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleMode {
    Heating,
    HotWater,
    Cooling,
    Defrost,
    CompressorStart,
}

impl CycleMode {
    pub const ALL: [CycleMode; 5] = [
        CycleMode::Heating,
        CycleMode::HotWater,
        CycleMode::Cooling,
        CycleMode::Defrost,
        CycleMode::CompressorStart,
    ];

    pub const fn code(self) -> i64 {
        match self {
            CycleMode::Heating => operating_state::HEATING,
            CycleMode::HotWater => operating_state::HOT_WATER,
            CycleMode::Cooling => operating_state::COOLING,
            CycleMode::Defrost => operating_state::DEFROST,
            CycleMode::CompressorStart => STATE_START_COMPRESSOR,
        }
    }

    pub const fn source(self) -> EdgeSource {
        match self {
            CycleMode::CompressorStart => EdgeSource::State,
            _ => EdgeSource::OperatingState,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            CycleMode::Heating => "heating",
            CycleMode::HotWater => "hot_water",
            CycleMode::Cooling => "cooling",
            CycleMode::Defrost => "defrost",
            CycleMode::CompressorStart => "compressor_start",
        }
    }
}

impl fmt::Display for CycleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
