use super::plan::PlannedRegister;
use crate::error::{LambdaError, Result};
use crate::modbus::{WordOrder, decode_int16, decode_int32};
use crate::registers::{DataType, RegisterTemplate};
use chrono::{DateTime, Utc};

/// Decoded value of one register for one poll cycle
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterValue {
    pub template: &'static RegisterTemplate,
    pub index: u8,
    pub address: u16,
    pub words: Vec<u16>,
    /// Scaled value at full precision; the raw code for text-mapped registers
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl RegisterValue {
    /// Value rounded to the template precision
    pub fn display(&self) -> f64 {
        round_to(self.value, self.template.precision)
    }

    /// Enum label of a text-mapped register
    pub fn label(&self) -> Option<&'static str> {
        if self.template.text_mapping {
            self.template.label_for(self.value as i64)
        } else {
            None
        }
    }
}

pub fn round_to(value: f64, precision: u8) -> f64 {
    let m = 10f64.powi(precision as i32);
    (value * m).round() / m
}

/// Raw signed/unsigned integer held by the words of one register
pub fn raw_integer(data_type: DataType, words: &[u16], order: WordOrder) -> Option<i64> {
    match (data_type, words) {
        (DataType::Uint16, [w]) => Some(*w as i64),
        (DataType::Int16, [w]) => Some(decode_int16(*w) as i64),
        (DataType::Int32, [a, b]) => Some(decode_int32([*a, *b], order) as i64),
        _ => None,
    }
}

pub fn decode_register(
    reg: &PlannedRegister,
    words: &[u16],
    order: WordOrder,
    timestamp: DateTime<Utc>,
) -> Result<RegisterValue> {
    decode_register_as(reg, reg.template.data_type, words, order, timestamp)
}

/// Decode with a type other than the template's, for registers whose
/// signedness depends on the site configuration
pub fn decode_register_as(
    reg: &PlannedRegister,
    data_type: DataType,
    words: &[u16],
    order: WordOrder,
    timestamp: DateTime<Utc>,
) -> Result<RegisterValue> {
    let template = reg.template;
    let raw = raw_integer(data_type, words, order).ok_or_else(|| {
        LambdaError::decode(
            reg.address,
            format!(
                "{:?} needs {} word(s), got {}",
                data_type,
                data_type.word_count(),
                words.len()
            ),
        )
    })?;
    let value = if template.text_mapping {
        raw as f64
    } else {
        raw as f64 * template.scale
    };
    if !value.is_finite() {
        return Err(LambdaError::decode(reg.address, "value is not finite"));
    }
    Ok(RegisterValue {
        template,
        index: reg.index,
        address: reg.address,
        words: words.to_vec(),
        value,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{SubunitKind, find_template};

    fn planned(kind: SubunitKind, name: &str, index: u8) -> PlannedRegister {
        let template = find_template(kind, name).unwrap();
        PlannedRegister {
            template,
            index,
            address: template.absolute_address(index),
            sensor_id: kind.sensor_id(index, name),
        }
    }

    #[test]
    fn test_scaled_int16() {
        let reg = planned(SubunitKind::Hp, "flow_line_temperature", 1);
        let v = decode_register(&reg, &[3512], WordOrder::HighFirst, Utc::now()).unwrap();
        assert!((v.value - 35.12).abs() < 1e-9);
        assert!((v.display() - 35.1).abs() < 1e-9);

        let v = decode_register(&reg, &[(-250i16) as u16], WordOrder::HighFirst, Utc::now()).unwrap();
        assert!((v.value + 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_text_mapped_keeps_raw_code() {
        let reg = planned(SubunitKind::Hp, "operating_state", 1);
        let v = decode_register(&reg, &[2], WordOrder::HighFirst, Utc::now()).unwrap();
        assert_eq!(v.value, 2.0);
        assert_eq!(v.label(), Some("DHW"));
    }

    #[test]
    fn test_int32_respects_word_order() {
        let reg = planned(SubunitKind::Hp, "compressor_power_consumption_accumulated", 1);
        let big = decode_register(&reg, &[0x0001, 0x86A0], WordOrder::HighFirst, Utc::now()).unwrap();
        let little = decode_register(&reg, &[0x86A0, 0x0001], WordOrder::LowFirst, Utc::now()).unwrap();
        assert_eq!(big.value, 100_000.0);
        assert_eq!(little.value, 100_000.0);
    }

    #[test]
    fn test_pv_power_signedness_override() {
        let reg = planned(SubunitKind::Main, "emgr_actual_power", 1);
        let signed = decode_register(&reg, &[0xFD12], WordOrder::HighFirst, Utc::now()).unwrap();
        assert_eq!(signed.value, -750.0);
        let unsigned =
            decode_register_as(&reg, DataType::Uint16, &[0xFD12], WordOrder::HighFirst, Utc::now())
                .unwrap();
        assert_eq!(unsigned.value, 64_786.0);
    }

    #[test]
    fn test_wrong_word_count_is_decode_error() {
        let reg = planned(SubunitKind::Hp, "compressor_power_consumption_accumulated", 1);
        let err = decode_register(&reg, &[1], WordOrder::HighFirst, Utc::now()).unwrap_err();
        assert!(matches!(err, LambdaError::Decode { address: 1020, .. }));
    }
}
