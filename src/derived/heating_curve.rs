//! Calculated flow-line temperature per heating circuit

use crate::config::{CurvePoints, HeatingCurveConfig};
use crate::logging::{StructuredLogger, get_logger};
use crate::polling::{RawSnapshot, round_to};
use std::collections::HashMap;

/// Register the curve is evaluated against
pub const AMBIENT_SENSOR: &str = "ambient_temperature_calculated";

fn lerp(x: f64, x_a: f64, y_a: f64, x_b: f64, y_b: f64) -> f64 {
    if x_b == x_a {
        return y_a;
    }
    y_a + (x - x_a) * (y_b - y_a) / (x_b - x_a)
}

/// Piecewise-linear flow temperature, flat outside the cold and warm points
pub fn base_flow(points: &CurvePoints, ambient: f64) -> f64 {
    if ambient >= points.warm_outside {
        points.warm_flow
    } else if ambient > points.mid_outside {
        lerp(ambient, points.mid_outside, points.mid_flow, points.warm_outside, points.warm_flow)
    } else if ambient > points.cold_outside {
        lerp(ambient, points.cold_outside, points.cold_flow, points.mid_outside, points.mid_flow)
    } else {
        points.cold_flow
    }
}

/// Description of an implausible curve, if it is one
pub fn implausibility(points: &CurvePoints) -> Option<String> {
    if points.cold_flow <= points.mid_flow {
        Some(format!("cold ({}) <= mid ({})", points.cold_flow, points.mid_flow))
    } else if points.mid_flow <= points.warm_flow {
        Some(format!("mid ({}) <= warm ({})", points.mid_flow, points.warm_flow))
    } else {
        None
    }
}

pub struct HeatingCurve {
    config: HeatingCurveConfig,
    room_thermostat: bool,
    last_warning: HashMap<u8, String>,
    logger: StructuredLogger,
}

impl HeatingCurve {
    pub fn new(config: &HeatingCurveConfig, room_thermostat: bool) -> Self {
        Self {
            config: config.clone(),
            room_thermostat,
            last_warning: HashMap::new(),
            logger: get_logger("heating_curve"),
        }
    }

    /// Flow temperature for circuit `hc`; `None` without an ambient value
    /// or with an implausible curve
    pub fn evaluate(&mut self, hc: u8, raw: &RawSnapshot) -> Option<f64> {
        let ambient = raw.value(AMBIENT_SENSOR)?;
        let points = self.config.points_for(hc);

        if let Some(warning) = implausibility(&points) {
            if self.last_warning.get(&hc) != Some(&warning) {
                self.logger
                    .warn(&format!("Heating curve of hc{} is implausible: {}", hc, warning));
                self.last_warning.insert(hc, warning);
            }
            return None;
        }
        self.last_warning.remove(&hc);

        let mut flow = base_flow(&points, ambient);

        if self.room_thermostat {
            let factor = self.config.room_thermostat_factor;
            let actual = raw.value(&format!("hc{}_room_device_temperature", hc));
            let target = raw.value(&format!("hc{}_target_room_temperature", hc));
            match (target, actual) {
                _ if factor <= 0.0 => {
                    self.logger.debug(&format!(
                        "Room thermostat factor {} is not positive, no adjustment",
                        factor
                    ));
                }
                (Some(target), Some(actual)) => {
                    flow += (target - actual - self.config.room_thermostat_offset) * factor;
                }
                _ => self
                    .logger
                    .debug(&format!("Room temperatures of hc{} missing, no adjustment", hc)),
            }
        }

        if let Some(offset) = raw.value(&format!("hc{}_set_flow_line_offset_temperature", hc)) {
            flow += offset;
        }

        Some(round_to(flow, self.config.precision))
    }
}
