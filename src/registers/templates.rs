use super::labels::{
    AMBIENT_STATE, BOIL_OPERATING_STATE, BUFF_OPERATING_STATE, REQUEST_TYPE, EMGR_STATE,
    HC_OPERATING_MODE, HC_OPERATING_STATE, HP_ERROR_STATE, HP_OPERATING_STATE, HP_STATE, ON_OFF,
    SOL_OPERATING_STATE,
};
use super::{DataType, RegisterTemplate, SubunitKind};

use DataType::{Int16, Int32, Uint16};

const fn hp(name: &'static str, rel: u16, dt: DataType, scale: f64, prec: u8, unit: &'static str) -> RegisterTemplate {
    RegisterTemplate::new(SubunitKind::Hp, name, rel, dt, scale, prec, unit)
}

const fn boil(name: &'static str, rel: u16, dt: DataType, scale: f64, prec: u8, unit: &'static str) -> RegisterTemplate {
    RegisterTemplate::new(SubunitKind::Boil, name, rel, dt, scale, prec, unit)
}

const fn buff(name: &'static str, rel: u16, dt: DataType, scale: f64, prec: u8, unit: &'static str) -> RegisterTemplate {
    RegisterTemplate::new(SubunitKind::Buff, name, rel, dt, scale, prec, unit)
}

const fn sol(name: &'static str, rel: u16, dt: DataType, scale: f64, prec: u8, unit: &'static str) -> RegisterTemplate {
    RegisterTemplate::new(SubunitKind::Sol, name, rel, dt, scale, prec, unit)
}

const fn hc(name: &'static str, rel: u16, dt: DataType, scale: f64, prec: u8, unit: &'static str) -> RegisterTemplate {
    RegisterTemplate::new(SubunitKind::Hc, name, rel, dt, scale, prec, unit)
}

const fn site(name: &'static str, addr: u16, dt: DataType, scale: f64, prec: u8, unit: &'static str) -> RegisterTemplate {
    RegisterTemplate::new(SubunitKind::Main, name, addr, dt, scale, prec, unit)
}

/// Site-wide registers; addresses are absolute
pub static MAIN_TEMPLATES: &[RegisterTemplate] = &[
    site("ambient_error_number", 0, Int16, 1.0, 0, ""),
    site("ambient_operating_state", 1, Uint16, 1.0, 0, "").text(AMBIENT_STATE),
    site("ambient_temperature", 2, Int16, 0.1, 1, "°C"),
    site("ambient_temperature_1h", 3, Int16, 0.1, 1, "°C"),
    site("ambient_temperature_calculated", 4, Int16, 0.1, 1, "°C"),
    site("emgr_error_number", 100, Int16, 1.0, 0, ""),
    site("emgr_operating_state", 101, Uint16, 1.0, 0, "").text(EMGR_STATE),
    // Read as uint16 unless the PV surplus mode is `neg`
    site("emgr_actual_power", 102, Int16, 1.0, 0, "W"),
    site("emgr_actual_power_consumption", 103, Int16, 1.0, 0, "W"),
    site("emgr_power_consumption_setpoint", 104, Int16, 1.0, 0, "W"),
];

pub static HP_TEMPLATES: &[RegisterTemplate] = &[
    hp("error_state", 0, Uint16, 1.0, 0, "").text(HP_ERROR_STATE),
    hp("error_number", 1, Int16, 1.0, 0, ""),
    hp("state", 2, Uint16, 1.0, 0, "").text(HP_STATE),
    hp("operating_state", 3, Uint16, 1.0, 0, "").text(HP_OPERATING_STATE),
    hp("flow_line_temperature", 4, Int16, 0.01, 1, "°C"),
    hp("return_line_temperature", 5, Int16, 0.01, 1, "°C"),
    hp("volume_flow_heat_sink", 6, Int16, 0.01, 1, "l/min"),
    hp("energy_source_inlet_temperature", 7, Int16, 0.01, 1, "°C"),
    hp("energy_source_outlet_temperature", 8, Int16, 0.01, 1, "°C"),
    hp("volume_flow_energy_source", 9, Int16, 0.01, 1, "l/min"),
    hp("compressor_unit_rating", 10, Uint16, 0.01, 0, "%"),
    hp("actual_heating_capacity", 11, Int16, 0.1, 1, "kW"),
    hp("inverter_power_consumption", 12, Int16, 1.0, 0, "W"),
    hp("cop", 13, Int16, 0.01, 2, ""),
    hp("request_type", 15, Int16, 1.0, 0, "").writable().text(REQUEST_TYPE),
    hp("requested_flow_line_temperature", 16, Int16, 0.1, 1, "°C").writable(),
    hp("requested_return_line_temperature", 17, Int16, 0.1, 1, "°C").writable(),
    hp("requested_flow_to_return_line_temperature_difference", 18, Int16, 0.1, 1, "°C").writable(),
    hp("relais_state_2nd_heating_stage", 19, Int16, 1.0, 0, "").text(ON_OFF),
    hp("compressor_power_consumption_accumulated", 20, Int32, 1.0, 0, "Wh"),
    hp("compressor_thermal_energy_output_accumulated", 22, Int32, 1.0, 0, "Wh"),
    hp("config_parameter_24", 24, Uint16, 1.0, 0, ""),
    hp("vda_rating", 25, Uint16, 0.01, 2, "%"),
    hp("hot_gas_temperature", 26, Int16, 0.01, 2, "°C"),
    hp("subcooling_temperature", 27, Int16, 0.01, 2, "°C"),
    hp("suction_gas_temperature", 28, Int16, 0.01, 2, "°C"),
    hp("condensation_temperature", 29, Int16, 0.01, 2, "°C"),
    hp("evaporation_temperature", 30, Int16, 0.01, 2, "°C"),
    hp("eqm_rating", 31, Uint16, 0.01, 0, "%"),
    hp("expansion_valve_opening_angle", 32, Uint16, 0.01, 0, "%"),
    hp("config_parameter_33", 33, Uint16, 1.0, 0, ""),
    hp("config_parameter_50", 50, Uint16, 1.0, 0, ""),
    hp("dhw_output_power_15c", 51, Uint16, 0.1, 1, "kW").writable(),
    hp("heating_min_output_power_15c", 52, Uint16, 0.1, 1, "kW").writable(),
    hp("heating_max_output_power_15c", 53, Uint16, 0.1, 1, "kW").writable(),
    hp("heating_min_output_power_0c", 54, Uint16, 0.1, 1, "kW").writable(),
    hp("heating_max_output_power_0c", 55, Uint16, 0.1, 1, "kW").writable(),
    hp("heating_min_output_power_minus15c", 56, Uint16, 0.1, 1, "kW").writable(),
    hp("heating_max_output_power_minus15c", 57, Uint16, 0.1, 1, "kW").writable(),
    hp("cooling_min_output_power", 58, Uint16, 0.1, 1, "kW").writable(),
    hp("cooling_max_output_power", 59, Uint16, 0.1, 1, "kW").writable(),
    hp("config_parameter_60", 60, Uint16, 1.0, 0, ""),
];

pub static BOIL_TEMPLATES: &[RegisterTemplate] = &[
    boil("error_number", 0, Int16, 1.0, 0, ""),
    boil("operating_state", 1, Uint16, 1.0, 0, "").text(BOIL_OPERATING_STATE),
    boil("actual_high_temperature", 2, Int16, 0.1, 1, "°C"),
    boil("actual_low_temperature", 3, Int16, 0.1, 1, "°C"),
    boil("actual_circulation_temperature", 4, Int16, 0.1, 1, "°C"),
    boil("actual_circulation_pump_state", 5, Int16, 1.0, 0, "").text(ON_OFF),
    boil("target_high_temperature", 50, Int16, 0.1, 1, "°C").writable(),
];

pub static BUFF_TEMPLATES: &[RegisterTemplate] = &[
    buff("error_number", 0, Int16, 1.0, 0, ""),
    buff("operating_state", 1, Uint16, 1.0, 0, "").text(BUFF_OPERATING_STATE),
    buff("actual_high_temperature", 2, Int16, 0.1, 1, "°C"),
    buff("actual_low_temperature", 3, Int16, 0.1, 1, "°C"),
    buff("buffer_temperature_high_setpoint", 4, Int16, 0.1, 1, "°C").writable(),
    buff("request_type", 5, Int16, 1.0, 0, "").text(REQUEST_TYPE),
    buff("request_flow_line_temp_setpoint", 6, Int16, 0.1, 1, "°C"),
    buff("request_return_line_temp_setpoint", 7, Int16, 0.1, 1, "°C"),
    buff("request_heat_sink_temp_diff_setpoint", 8, Int16, 0.1, 1, "K"),
    buff("modbus_request_heating_capacity", 9, Int16, 0.1, 1, "kW"),
    buff("maximum_buffer_temp", 50, Int16, 0.1, 1, "°C").writable(),
];

pub static SOL_TEMPLATES: &[RegisterTemplate] = &[
    sol("error_number", 0, Int16, 1.0, 0, ""),
    sol("operating_state", 1, Uint16, 1.0, 0, "").text(SOL_OPERATING_STATE),
    sol("collector_temperature", 2, Int16, 0.1, 1, "°C"),
    sol("storage_temperature", 3, Int16, 0.1, 1, "°C"),
    sol("power_current", 4, Int16, 0.1, 1, "kW"),
    sol("energy_total", 5, Int32, 1.0, 0, "kWh"),
    sol("maximum_buffer_temperature", 50, Int16, 0.1, 1, "°C").writable(),
    sol("buffer_changeover_temperature", 51, Int16, 0.1, 1, "°C").writable(),
];

pub static HC_TEMPLATES: &[RegisterTemplate] = &[
    hc("error_number", 0, Int16, 1.0, 0, ""),
    hc("operating_state", 1, Uint16, 1.0, 0, "").text(HC_OPERATING_STATE),
    hc("flow_line_temperature", 2, Int16, 0.1, 1, "°C"),
    hc("return_line_temperature", 3, Int16, 0.1, 1, "°C"),
    hc("room_device_temperature", 4, Int16, 0.1, 1, "°C").writable(),
    hc("set_flow_line_temperature", 5, Int16, 0.1, 1, "°C").writable(),
    hc("operating_mode", 6, Int16, 1.0, 0, "").writable().text(HC_OPERATING_MODE),
    hc("target_temp_flow_line", 7, Int16, 0.1, 1, "°C").firmware(3),
    hc("set_flow_line_offset_temperature", 50, Int16, 0.1, 1, "°C").writable(),
    hc("target_room_temperature", 51, Int16, 0.1, 1, "°C").writable(),
    hc("set_cooling_mode_room_temperature", 52, Int16, 0.1, 1, "°C").writable(),
];
