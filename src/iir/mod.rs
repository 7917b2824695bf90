//! Fixed-point direct form 1 IIR filter.
//!
//! The same filter runs the PID-equivalent compensator and the simulated plant, the two differ only
//! in their [`Coefficients`].

use log::warn;

use crate::{Q15, Q15_SHIFT};

/// Convert a real coefficient to Q15 bits, truncating toward zero.
fn to_q15_bits(x: f64) -> i32 {
    (x * (1i64 << Q15_SHIFT) as f64) as i32
}

/// Normalize coefficients to 1/a0
fn normalize<const NB: usize, const NA: usize>(
    b: [f64; NB],
    a0: f64,
    a: [f64; NA],
) -> ([f64; NB], [f64; NA]) {
    let x = a0.recip();
    (b.map(|b| b * x), a.map(|a| a * x))
}

/// Immutable Q15 coefficients of a monic transfer function
///
/// `H(z) = (b0 + b1 z^-1 + ... ) / (1 + a1 z^-1 + ...)` with `NB` numerator taps and `NA` feedback
/// taps.  The leading denominator coefficient is not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coefficients<const NB: usize, const NA: usize> {
    b: [i32; NB],
    a: [i32; NA],
}

impl<const NB: usize, const NA: usize> Coefficients<NB, NA> {
    /// Create coefficients from a monic transfer function
    ///
    /// `a` holds `a1..aNA`, `a0` is taken to be one.
    pub fn new(b: [f64; NB], a: [f64; NA]) -> Self {
        Self {
            b: b.map(to_q15_bits),
            a: a.map(to_q15_bits),
        }
    }

    /// Create coefficients from a transfer function whose leading denominator term is `a0`
    pub fn from_transfer_function(b: [f64; NB], a0: f64, a: [f64; NA]) -> Self {
        let (b, a) = normalize(b, a0, a);
        Self::new(b, a)
    }

    /// Create coefficients directly from Q15 bit patterns
    pub const fn from_bits(b: [i32; NB], a: [i32; NA]) -> Self {
        Self { b, a }
    }

    /// Numerator coefficients as Q15 bits
    pub fn numerator(&self) -> &[i32; NB] {
        &self.b
    }

    /// Feedback coefficients `a1..` as Q15 bits
    pub fn denominator(&self) -> &[i32; NA] {
        &self.a
    }
}

impl Coefficients<3, 2> {
    /// PID-equivalent compensator of the firmware control loop
    pub fn pid_compensator() -> Self {
        Self::new([1.0, -1.35569551, 0.42632345], [-1.21587686, 0.2865048])
    }
}

impl Coefficients<2, 2> {
    /// Second order model of the analog plant used by the simulator
    pub fn plant_model() -> Self {
        Self::new(
            [0.04976845243756167, 0.035050642374672925],
            [-1.2631799459800208, 0.34799904079225535],
        )
    }
}

/// A fixed-point IIR filter evaluated as `y[n] = sum(b_i x[n-i]) - sum(a_j y[n-j])`
///
/// Each product is formed in 64 bits and shifted by 15 on its own, so the output is bit-exact with
/// a 32-bit firmware that shifts term by term.  The sum is then clamped to the output limits; a
/// clamp raises the [`saturated`](Self::saturated) flag until the next [`reset`](Self::reset).
///
/// # Examples
///
/// ```
/// use fixed_control::iir::{Coefficients, IirFilter};
/// use fixed_control::Q15;
///
/// let mut plant = IirFilter::new(Coefficients::plant_model());
/// let mut y = Q15::ZERO;
/// for _ in 0..500 {
///     y = plant.step(Q15::from_num(0.5));
/// }
/// assert!((y.to_num::<f64>() - 0.5).abs() < 0.01);
/// ```
#[derive(Debug, Clone)]
pub struct IirFilter<const NB: usize, const NA: usize> {
    coefficients: Coefficients<NB, NA>,

    // history, newest first
    x: [i32; NB],
    y: [i32; NA],

    // limits
    min_y: i32,
    max_y: i32,
    saturated: bool,
}

/// Compensator of the filter-based control loop
pub type Compensator = IirFilter<3, 2>;

/// Plant model of the simulator
pub type PlantModel = IirFilter<2, 2>;

impl<const NB: usize, const NA: usize> IirFilter<NB, NA> {
    const HAS_NUMERATOR: () = assert!(NB > 0, "an IIR filter needs at least one numerator tap");

    /// Create a filter with zeroed history
    pub fn new(coefficients: Coefficients<NB, NA>) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::HAS_NUMERATOR;
        Self {
            coefficients,
            x: [0; NB],
            y: [0; NA],
            min_y: i32::MIN,
            max_y: i32::MAX,
            saturated: false,
        }
    }

    /// Set a minimum output for the filter
    pub fn set_min(&mut self, y: Q15) {
        self.min_y = y.to_bits();
    }

    /// Set a maximum output for the filter
    pub fn set_max(&mut self, y: Q15) {
        self.max_y = y.to_bits();
    }

    /// Set a +- limit for the output of the filter
    pub fn set_limit(&mut self, y: Q15) {
        self.set_min(-y);
        self.set_max(y);
    }

    /// Consume filter and return new filter with a set minimum for the output
    pub fn with_min(mut self, y: Q15) -> Self {
        self.set_min(y);
        self
    }

    /// Consume filter and return new filter with a set maximum for the output
    pub fn with_max(mut self, y: Q15) -> Self {
        self.set_max(y);
        self
    }

    /// Consume filter and return new filter with a +- limit for the output
    pub fn with_limit(mut self, y: Q15) -> Self {
        self.set_limit(y);
        self
    }

    /// Add a new input sample and get the resulting output
    pub fn step(&mut self, input: Q15) -> Q15 {
        self.x.copy_within(0..NB - 1, 1);
        self.x[0] = input.to_bits();

        let feedforward: i64 = self
            .coefficients
            .b
            .iter()
            .zip(&self.x)
            .map(|(&b, &x)| (i64::from(b) * i64::from(x)) >> Q15_SHIFT)
            .sum();
        let feedback: i64 = self
            .coefficients
            .a
            .iter()
            .zip(&self.y)
            .map(|(&a, &y)| (i64::from(a) * i64::from(y)) >> Q15_SHIFT)
            .sum();

        let y = self.limit(feedforward - feedback);

        if NA > 0 {
            self.y.copy_within(0..NA - 1, 1);
            self.y[0] = y;
        }

        Q15::from_bits(y)
    }

    fn limit(&mut self, acc: i64) -> i32 {
        let y = acc.clamp(i64::from(self.min_y), i64::from(self.max_y));
        if y != acc {
            if !self.saturated {
                warn!("IIR output {} saturated to {}", acc, y);
            }
            self.saturated = true;
        }
        y as i32
    }

    /// Reset the filter
    ///
    /// This clears the input and output history and the saturation flag
    pub fn reset(&mut self) {
        self.x = [0; NB];
        self.y = [0; NA];
        self.saturated = false;
    }

    /// Return the latest output of the filter without updating
    ///
    /// Filters without feedback taps keep no output history and always report zero.
    pub fn value(&self) -> Q15 {
        Q15::from_bits(self.y.first().copied().unwrap_or(0))
    }

    /// Whether any output since the last reset had to be clamped
    pub fn saturated(&self) -> bool {
        self.saturated
    }

    /// Coefficients the filter was built with
    pub fn coefficients(&self) -> &Coefficients<NB, NA> {
        &self.coefficients
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    // steady state of a constant input, evaluated in floating point
    fn dc_gain<const NB: usize, const NA: usize>(c: &Coefficients<NB, NA>) -> f64 {
        let scale = (1i64 << Q15_SHIFT) as f64;
        let num: f64 = c.b.iter().map(|&b| b as f64 / scale).sum();
        let den: f64 = 1.0 + c.a.iter().map(|&a| a as f64 / scale).sum::<f64>();
        num / den
    }

    #[test]
    fn coefficients_truncate_like_firmware() {
        let pid = Coefficients::pid_compensator();
        assert_eq!(pid.numerator(), &[32768, -44423, 13969]);
        assert_eq!(pid.denominator(), &[-39841, 9388]);

        let plant = Coefficients::plant_model();
        assert_eq!(plant.numerator(), &[1630, 1148]);
        assert_eq!(plant.denominator(), &[-41391, 11403]);
    }

    #[test]
    fn normalization() {
        let a = Coefficients::<2, 1>::from_transfer_function([1.0, 0.5], 2.0, [-1.0]);
        let b = Coefficients::<2, 1>::new([0.5, 0.25], [-0.5]);
        assert_eq!(a, b);
    }

    #[test]
    fn zero_input_stays_zero() {
        let mut filter = IirFilter::new(Coefficients::pid_compensator());
        for _ in 0..1000 {
            assert_eq!(filter.step(Q15::ZERO), Q15::ZERO);
        }
        assert!(!filter.saturated());
    }

    #[test]
    fn first_output_is_numerator_term() {
        // reference of 2 V and an unloaded input, as seen by the firmware PID loop
        let r = 19859;
        let error = 2 * r;
        let mut filter = IirFilter::new(Coefficients::pid_compensator());
        let y = filter.step(Q15::from_bits(error));
        assert_eq!(y.to_bits(), ((32768i64 * error as i64) >> 15) as i32);
        assert_eq!(filter.value(), y);
    }

    #[test]
    fn recurrence_by_hand() {
        let mut filter = IirFilter::new(Coefficients::plant_model());
        let x = 16384i64;
        let y0 = (1630 * x) >> 15;
        let y1 = ((1630 * x) >> 15) + ((1148 * x) >> 15) - ((-41391 * y0) >> 15);
        let y2 = ((1630 * x) >> 15) + ((1148 * x) >> 15)
            - ((-41391 * y1) >> 15)
            - ((11403 * y0) >> 15);
        assert_eq!(filter.step(Q15::from_bits(x as i32)).to_bits() as i64, y0);
        assert_eq!(filter.step(Q15::from_bits(x as i32)).to_bits() as i64, y1);
        assert_eq!(filter.step(Q15::from_bits(x as i32)).to_bits() as i64, y2);
    }

    #[test]
    fn plant_step_response() {
        let coefficients = Coefficients::plant_model();
        let mut filter = IirFilter::new(coefficients);
        let mut y = Q15::ZERO;
        for _ in 0..500 {
            y = filter.step(Q15::from_num(0.5));
        }
        let expected = 0.5 * dc_gain(&coefficients);
        assert_abs_diff_eq!(y.to_num::<f64>(), expected, epsilon = 0.005);
    }

    #[test]
    fn limits() {
        let mut filter = IirFilter::new(Coefficients::<1, 1>::new([0.5], [-1.0]))
            .with_max(Q15::from_num(1.0));
        let mut y = Q15::ZERO;
        for _ in 0..100 {
            y = filter.step(Q15::from_num(1.0))
        }
        assert_eq!(y, Q15::from_num(1.0));
        assert!(filter.saturated());

        let mut filter = IirFilter::new(Coefficients::<1, 1>::new([0.5], [-1.0]))
            .with_min(Q15::from_num(-1.0));
        for _ in 0..100 {
            y = filter.step(Q15::from_num(-1.0))
        }
        assert_eq!(y, Q15::from_num(-1.0));
        assert!(filter.saturated());

        filter.reset();
        assert!(!filter.saturated());
        assert_eq!(filter.value(), Q15::ZERO);
    }

    #[test]
    fn accumulator_overflow_saturates() {
        // an integrator fed with full scale runs out of i32 range without limits
        let mut filter = IirFilter::new(Coefficients::<1, 1>::new([1.0], [-1.0]));
        let mut y = Q15::ZERO;
        for _ in 0..10 {
            y = filter.step(Q15::from_bits(i32::MAX / 2));
        }
        assert_eq!(y.to_bits(), i32::MAX);
        assert!(filter.saturated());
    }

    #[test]
    fn fir_without_feedback() {
        let mut filter = IirFilter::new(Coefficients::<2, 0>::new([0.5, 0.5], []));
        assert_eq!(filter.step(Q15::from_num(1.0)), Q15::from_num(0.5));
        assert_eq!(filter.step(Q15::from_num(1.0)), Q15::from_num(1.0));
        assert_eq!(filter.value(), Q15::ZERO);
    }

    proptest! {
        #[test]
        fn replay_after_reset_is_bit_exact(input in prop::collection::vec(-40_000i32..40_000, 1..200)) {
            let mut filter = IirFilter::new(Coefficients::pid_compensator());
            let first: Vec<Q15> = input.iter().map(|&x| filter.step(Q15::from_bits(x))).collect();
            filter.reset();
            let second: Vec<Q15> = input.iter().map(|&x| filter.step(Q15::from_bits(x))).collect();
            prop_assert_eq!(first, second);
        }
    }
}
