/// Projects 64-bit PRG outputs into a bounded fixed-point float domain.
///
/// A converted value carries `integer_digits` decimal digits before the
/// point and `fractional_digits` after it. Conversion is a truncating
/// decimal shift followed by a sign-preserving modulo, so additive shares
/// produced from the same PRG stream cancel modulo `10^integer_digits`.
#[derive(Clone, Copy, Debug)]
pub struct FixedPointConvertor {
    integer_digits: u32,
    fractional_digits: u32,
}

impl FixedPointConvertor {
    /// The combined digit budget must fit a 64-bit integer
    /// (`i + f <= 64 * log10(2)`), otherwise conversion would alias.
    pub fn new(integer_digits: u32, fractional_digits: u32) -> Self {
        assert!(
            f64::from(integer_digits + fractional_digits) <= 64.0 * 2f64.log10(),
            "digit budget exceeds 64-bit range"
        );
        FixedPointConvertor {
            integer_digits,
            fractional_digits,
        }
    }

    pub fn modulus(&self) -> f64 {
        10f64.powi(self.integer_digits as i32)
    }

    fn divisor(&self) -> f64 {
        10f64.powi(self.fractional_digits as i32)
    }

    /// Map a raw 64-bit value into the fixed-point domain.
    pub fn convert(&self, val: u64) -> f64 {
        // f64 `%` is fmod: truncating, sign of the dividend
        (val as f64 / self.divisor()) % self.modulus()
    }
}
