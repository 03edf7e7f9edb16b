//! Mathematical constants

/// 0.5 ln(2π)
pub const HALF_LN_2PI: f64 = 0.918_938_533_204_672_7;
/// 0.5 ln(2πe)
pub const HALF_LN_2PI_E: f64 = 1.418_938_533_204_672_7;
/// ln(2π)
pub const LN_2PI: f64 = 1.837_877_066_409_345_3;
