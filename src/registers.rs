//! Register schema for Lambda heat pump installations
//!
//! Every Modbus register the engine knows about is described once by a
//! static [`RegisterTemplate`]. A site is a set of subunits (heat pumps,
//! boilers, buffers, solar modules, heating circuits) whose register blocks
//! start at a fixed base address per kind; [`SystemShape`] records how many
//! of each kind are installed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub mod labels;
mod templates;

pub use templates::{
    BOIL_TEMPLATES, BUFF_TEMPLATES, HC_TEMPLATES, HP_TEMPLATES, MAIN_TEMPLATES, SOL_TEMPLATES,
};

/// Distance between two subunits of the same kind
pub const SUBUNIT_STRIDE: u16 = 100;

/// Firmware names as shown by the heat pump, mapped to the schema version
pub const FIRMWARE_VERSIONS: &[(&str, u8)] = &[
    ("V0.0.3-3K", 1),
    ("V0.0.4-3K", 2),
    ("V0.0.5-3K", 3),
    ("V0.0.6-3K", 4),
    ("V0.0.7-3K", 5),
    ("V0.0.8-3K", 6),
    ("V0.0.9-3K", 7),
];

pub const DEFAULT_FIRMWARE: &str = "V0.0.8-3K";

/// Resolve a firmware name (or a bare number) to its schema version
pub fn firmware_from_name(name: &str) -> Option<u8> {
    let trimmed = name.trim();
    FIRMWARE_VERSIONS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(trimmed))
        .map(|(_, v)| *v)
        .or_else(|| trimmed.parse::<u8>().ok())
}

/// Kind of register block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubunitKind {
    /// Site-wide registers (ambient, e-manager) at absolute addresses
    Main,
    Hp,
    Boil,
    Buff,
    Sol,
    Hc,
}

impl SubunitKind {
    /// Kinds that come in numbered instances, in polling order
    pub const SUBUNITS: [SubunitKind; 5] = [
        SubunitKind::Hp,
        SubunitKind::Boil,
        SubunitKind::Buff,
        SubunitKind::Sol,
        SubunitKind::Hc,
    ];

    pub const fn base_address(self) -> u16 {
        match self {
            SubunitKind::Main => 0,
            SubunitKind::Hp => 1000,
            SubunitKind::Boil => 2000,
            SubunitKind::Buff => 3000,
            SubunitKind::Sol => 4000,
            SubunitKind::Hc => 5000,
        }
    }

    /// Highest instance count the firmware supports
    pub const fn max_count(self) -> u8 {
        match self {
            SubunitKind::Main => 1,
            SubunitKind::Hp => 3,
            SubunitKind::Boil => 5,
            SubunitKind::Buff => 5,
            SubunitKind::Sol => 2,
            SubunitKind::Hc => 12,
        }
    }

    /// Prefix used in sensor ids, empty for the main block
    pub const fn prefix(self) -> &'static str {
        match self {
            SubunitKind::Main => "",
            SubunitKind::Hp => "hp",
            SubunitKind::Boil => "boil",
            SubunitKind::Buff => "buff",
            SubunitKind::Sol => "sol",
            SubunitKind::Hc => "hc",
        }
    }

    /// First register of instance `index` (1-based)
    pub const fn subunit_base(self, index: u8) -> u16 {
        match self {
            SubunitKind::Main => 0,
            _ => self.base_address() + (index.saturating_sub(1) as u16) * SUBUNIT_STRIDE,
        }
    }

    pub fn templates(self) -> &'static [RegisterTemplate] {
        match self {
            SubunitKind::Main => MAIN_TEMPLATES,
            SubunitKind::Hp => HP_TEMPLATES,
            SubunitKind::Boil => BOIL_TEMPLATES,
            SubunitKind::Buff => BUFF_TEMPLATES,
            SubunitKind::Sol => SOL_TEMPLATES,
            SubunitKind::Hc => HC_TEMPLATES,
        }
    }

    /// Sensor id for a template of instance `index`
    pub fn sensor_id(self, index: u8, name: &str) -> String {
        match self {
            SubunitKind::Main => name.to_string(),
            _ => format!("{}{}_{}", self.prefix(), index, name),
        }
    }
}

impl fmt::Display for SubunitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubunitKind::Main => write!(f, "main"),
            other => write!(f, "{}", other.prefix()),
        }
    }
}

/// Wire representation of a register value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int16,
    Uint16,
    /// Signed 32 bit spread over two consecutive registers
    Int32,
}

impl DataType {
    pub const fn word_count(self) -> u16 {
        match self {
            DataType::Int16 | DataType::Uint16 => 1,
            DataType::Int32 => 2,
        }
    }
}

/// Immutable schema entry for one logical register
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisterTemplate {
    pub name: &'static str,
    pub kind: SubunitKind,
    pub relative_address: u16,
    pub data_type: DataType,
    pub scale: f64,
    pub precision: u8,
    pub unit: &'static str,
    pub firmware_min: u8,
    pub writable: bool,
    /// Numeric value is an enum code; the label is resolved downstream
    pub text_mapping: bool,
    pub options: Option<&'static [(i64, &'static str)]>,
}

impl RegisterTemplate {
    pub(crate) const fn new(
        kind: SubunitKind,
        name: &'static str,
        relative_address: u16,
        data_type: DataType,
        scale: f64,
        precision: u8,
        unit: &'static str,
    ) -> Self {
        Self {
            name,
            kind,
            relative_address,
            data_type,
            scale,
            precision,
            unit,
            firmware_min: 1,
            writable: false,
            text_mapping: false,
            options: None,
        }
    }

    pub(crate) const fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    pub(crate) const fn text(mut self, options: &'static [(i64, &'static str)]) -> Self {
        self.text_mapping = true;
        self.options = Some(options);
        self
    }

    pub(crate) const fn firmware(mut self, version: u8) -> Self {
        self.firmware_min = version;
        self
    }

    /// Absolute register address for instance `index`
    pub const fn absolute_address(&self, index: u8) -> u16 {
        self.kind.subunit_base(index) + self.relative_address
    }

    pub fn label_for(&self, raw: i64) -> Option<&'static str> {
        self.options.and_then(|opts| labels::lookup(opts, raw))
    }
}

/// Find a template of `kind` by name
pub fn find_template(kind: SubunitKind, name: &str) -> Option<&'static RegisterTemplate> {
    kind.templates().iter().find(|t| t.name == name)
}

/// Resolve a sensor id like `hc2_set_flow_line_offset_temperature` to its
/// template and instance index
pub fn resolve_sensor_id(sensor_id: &str) -> Option<(&'static RegisterTemplate, u8)> {
    for kind in SubunitKind::SUBUNITS {
        let Some(rest) = sensor_id.strip_prefix(kind.prefix()) else {
            continue;
        };
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            continue;
        }
        let Some(name) = rest[digits.len()..].strip_prefix('_') else {
            continue;
        };
        let Ok(index) = digits.parse::<u8>() else {
            continue;
        };
        if index == 0 || index > kind.max_count() {
            continue;
        }
        if let Some(t) = find_template(kind, name) {
            return Some((t, index));
        }
    }
    find_template(SubunitKind::Main, sensor_id).map(|t| (t, 1))
}

/// Installed subunits and per-site register overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemShape {
    pub num_hp: u8,
    pub num_boil: u8,
    pub num_buff: u8,
    pub num_sol: u8,
    pub num_hc: u8,
    /// Schema firmware version (see [`FIRMWARE_VERSIONS`])
    pub firmware: u8,
    pub disabled_registers: BTreeSet<u16>,
}

impl Default for SystemShape {
    fn default() -> Self {
        Self {
            num_hp: 1,
            num_boil: 1,
            num_buff: 0,
            num_sol: 0,
            num_hc: 1,
            firmware: 6,
            disabled_registers: BTreeSet::new(),
        }
    }
}

impl SystemShape {
    pub fn count(&self, kind: SubunitKind) -> u8 {
        match kind {
            SubunitKind::Main => 1,
            SubunitKind::Hp => self.num_hp,
            SubunitKind::Boil => self.num_boil,
            SubunitKind::Buff => self.num_buff,
            SubunitKind::Sol => self.num_sol,
            SubunitKind::Hc => self.num_hc,
        }
    }

    /// Set a subunit count, clamped to what the firmware supports
    pub fn set_count(&mut self, kind: SubunitKind, count: u8) {
        let count = count.min(kind.max_count());
        match kind {
            SubunitKind::Main => {}
            SubunitKind::Hp => self.num_hp = count,
            SubunitKind::Boil => self.num_boil = count,
            SubunitKind::Buff => self.num_buff = count,
            SubunitKind::Sol => self.num_sol = count,
            SubunitKind::Hc => self.num_hc = count,
        }
    }

    pub fn is_disabled(&self, address: u16) -> bool {
        self.disabled_registers.contains(&address)
    }

    /// Whether a template is readable on this site at `index`
    pub fn check_template(&self, template: &RegisterTemplate, index: u8) -> crate::Result<u16> {
        let address = template.absolute_address(index);
        if template.firmware_min > self.firmware {
            return Err(crate::LambdaError::FirmwareUnsupported {
                name: template.name.to_string(),
                required: template.firmware_min,
                installed: self.firmware,
            });
        }
        if self.is_disabled(address) {
            return Err(crate::LambdaError::RegisterDisabled { address });
        }
        Ok(address)
    }
}
