#![no_main]
use lambda_heatpump::config::Overrides;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = Overrides::from_yaml_str(text);
    }
});
