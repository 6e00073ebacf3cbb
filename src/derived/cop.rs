/// Decimals CoP sensors are published with
pub const COP_PRECISION: u8 = 2;

/// `thermal / electrical`; `None` when either side is missing or electrical ≤ 0
pub fn cop(thermal: Option<f64>, electrical: Option<f64>) -> Option<f64> {
    let (thermal, electrical) = (thermal?, electrical?);
    if electrical <= 0.0 || !thermal.is_finite() || !electrical.is_finite() {
        return None;
    }
    Some(thermal / electrical)
}
