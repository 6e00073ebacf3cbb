#![no_main]
use chrono::Utc;
use lambda_heatpump::modbus::{WordOrder, decode_int16, decode_int32};
use lambda_heatpump::polling::{PlannedRegister, decode_register};
use lambda_heatpump::registers::SubunitKind;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let regs: Vec<u16> = rest
        .chunks_exact(2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .collect();

    let templates = SubunitKind::SUBUNITS
        .iter()
        .flat_map(|kind| kind.templates().iter());
    let Some(template) = templates.clone().nth(selector as usize % templates.count().max(1)) else {
        return;
    };
    let reg = PlannedRegister {
        template,
        index: 1,
        address: template.absolute_address(1),
        sensor_id: template.name.to_string(),
    };
    let order = if selector & 0x80 == 0 {
        WordOrder::HighFirst
    } else {
        WordOrder::LowFirst
    };
    // Short or long word slices must come back as errors, never panics
    let _ = decode_register(&reg, &regs, order, Utc::now());

    if let [a, b, ..] = regs[..] {
        let _ = decode_int16(a);
        let _ = decode_int32([a, b], order);
    }
});
