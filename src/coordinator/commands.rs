use super::{Coordinator, CoordinatorCommand};
use crate::error::{LambdaError, Result};
use crate::modbus::{encode_int16, encode_uint16};
use crate::registers::{DataType, RegisterTemplate, resolve_sensor_id};
use tokio::sync::oneshot;

/// Largest register count of a single function code 3 request
pub const MAX_READ_COUNT: u16 = 125;

/// Word written for a raw register command; negatives become int16
pub fn encode_raw_value(value: i32) -> Result<u16> {
    if !(-32768..=65535).contains(&value) {
        return Err(LambdaError::validation(
            "value".to_string(),
            format!("{} is outside -32768..=65535", value),
        ));
    }
    Ok(if value < 0 {
        encode_int16(i64::from(value)).0
    } else {
        value as u16
    })
}

/// Scale a value into the register word of a writable template.
/// Returns the word and whether it had to be clamped.
pub fn encode_sensor_value(template: &RegisterTemplate, value: f64) -> Result<(u16, bool)> {
    if !template.writable {
        return Err(LambdaError::validation(
            template.name.to_string(),
            "register is read-only".to_string(),
        ));
    }
    if !value.is_finite() {
        return Err(LambdaError::validation(
            template.name.to_string(),
            format!("{} is not a number", value),
        ));
    }
    let raw = (value / template.scale).round() as i64;
    match template.data_type {
        DataType::Int16 => Ok(encode_int16(raw)),
        DataType::Uint16 => Ok(encode_uint16(raw)),
        DataType::Int32 => Err(LambdaError::validation(
            template.name.to_string(),
            "int32 registers cannot be written".to_string(),
        )),
    }
}

fn respond<T>(reply: Option<oneshot::Sender<Result<T>>>, result: Result<T>) {
    if let Some(tx) = reply {
        let _ = tx.send(result);
    }
}

impl Coordinator {
    pub(crate) async fn handle_command(&mut self, cmd: CoordinatorCommand) {
        match cmd {
            CoordinatorCommand::ReadRegister {
                address,
                count,
                reply,
            } => {
                let result = self.read_registers(address, count).await;
                let _ = reply.send(result);
            }
            CoordinatorCommand::WriteRegister {
                address,
                value,
                reply,
            } => {
                let result = self.write_register(address, value).await;
                respond(reply, result);
            }
            CoordinatorCommand::WriteSensor {
                sensor_id,
                value,
                reply,
            } => {
                let result = self.write_sensor(&sensor_id, value).await;
                respond(reply, result);
            }
            CoordinatorCommand::Reload => self.reload().await,
            CoordinatorCommand::Reset(scope) => self.apply_reset(scope).await,
        }
    }

    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        if count == 0 || count > MAX_READ_COUNT {
            return Err(LambdaError::validation(
                "count".to_string(),
                format!("{} is outside 1..={}", count, MAX_READ_COUNT),
            ));
        }
        self.ensure_connected().await?;
        let slave_id = self.config.site.slave_id;
        self.reader
            .read(self.transport.as_mut(), slave_id, address, count)
            .await
    }

    async fn write_register(&mut self, address: u16, value: i32) -> Result<()> {
        let word = encode_raw_value(value)?;
        self.write_word(address, word).await
    }

    async fn write_sensor(&mut self, sensor_id: &str, value: f64) -> Result<()> {
        let (template, index) = resolve_sensor_id(sensor_id).ok_or_else(|| {
            LambdaError::validation(sensor_id.to_string(), "unknown sensor".to_string())
        })?;
        if index == 0 || index > self.shape.count(template.kind) {
            return Err(LambdaError::validation(
                sensor_id.to_string(),
                format!("{} {} is not installed", template.kind, index),
            ));
        }
        let address = self.shape.check_template(template, index)?;
        let (word, clamped) = encode_sensor_value(template, value)?;
        if clamped {
            self.logger.warn(&format!(
                "Value {} for {} is out of range and was clamped",
                value, sensor_id
            ));
        }
        self.write_word(address, word).await
    }

    async fn write_word(&mut self, address: u16, word: u16) -> Result<()> {
        let slave_id = self.config.site.slave_id;
        let result = self
            .reader
            .write(self.transport.as_mut(), slave_id, address, &[word])
            .await;
        match &result {
            Ok(()) => self
                .logger
                .info(&format!("Wrote 0x{:04X} to register {}", word, address)),
            Err(e) => self
                .logger
                .warn(&format!("Write to register {} failed: {}", address, e)),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{SubunitKind, find_template};

    #[test]
    fn test_raw_values() {
        assert_eq!(encode_raw_value(-750).unwrap(), 0xFD12);
        assert_eq!(encode_raw_value(65535).unwrap(), 0xFFFF);
        assert_eq!(encode_raw_value(0).unwrap(), 0);
        assert!(encode_raw_value(65536).is_err());
        assert!(encode_raw_value(-32769).is_err());
    }

    #[test]
    fn test_sensor_values_are_scaled() {
        let target = find_template(SubunitKind::Hc, "target_room_temperature").unwrap();
        assert_eq!(encode_sensor_value(target, 21.5).unwrap(), (215, false));
        assert_eq!(
            encode_sensor_value(target, -2.0).unwrap(),
            ((-20i16) as u16, false)
        );

        let flow = find_template(SubunitKind::Hp, "flow_line_temperature").unwrap();
        assert!(encode_sensor_value(flow, 30.0).is_err());
    }
}
