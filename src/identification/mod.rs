//! ARX(2,2) system identification.
//!
//! The plant is excited with a two-level PRBS, its response is sampled once per period and the
//! model
//!
//! ```text
//! y[i] = θ0 y[i-1] + θ1 y[i-2] + θ2 u[i] + θ3 u[i-1] + θ4 u[i-2]
//! ```
//!
//! is fitted by batch least squares, `θ = (ΦᵀΦ)⁻¹ ΦᵀY`.
//!
//! A run goes through a fixed sequence of phases.  Each operation checks that the previous one
//! has completed, so a partially filled buffer can never reach the solver.

use core::fmt::{self, Write as _};

use heapless::Vec;
use log::{debug, error, info};
use num_traits::{Float, NumCast};
use thiserror::Error;

use crate::analog::{volts_to_mv, AnalogIo, Channel};
use crate::config::IdentificationConfig;
use crate::diagnostics::{DiagnosticSink, Line};
use crate::iir::Coefficients;
use crate::linalg::{gram, invert, mat_vec, transpose_mul_vec, LinalgError, Matrix};
use crate::scheduler::Scheduler;

pub mod prbs;

pub use self::prbs::Prbs;

/// Number of estimated parameters.
pub const PARAMETERS: usize = 5;

/// Samples of the firmware identification run.
pub const DEFAULT_SAMPLES: usize = 400;

/// Regressor row `[y[i-1], y[i-2], u[i], u[i-1], u[i-2]]`.
pub type Regressor<T> = [T; PARAMETERS];

/// Progress of an identification run, named after the last completed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Exciting,
    Acquiring,
    Regressing,
    Inverting,
    Estimating,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum IdentificationError {
    #[error("identification step needs phase {expected:?}, run is in {actual:?}")]
    OutOfOrder { expected: Phase, actual: Phase },
    #[error("expected {expected} samples, got {actual}")]
    SampleCount { expected: usize, actual: usize },
    #[error("regression matrix is not invertible: {0}")]
    SingularGram(#[from] LinalgError),
    #[error("least squares estimate is not finite")]
    NonFiniteEstimate,
}

/// Identified discrete transfer function.
///
/// `den` is monic.  `num` multiplies `u[i-1]` and `u[i-2]`, so the model carries one sample of
/// input delay; a direct `u[i]` term is kept apart in `feedthrough`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdentifiedModel<T> {
    pub den: [T; 3],
    pub num: [T; 2],
    pub feedthrough: T,
}

impl<T: Float> IdentifiedModel<T> {
    fn from_theta(theta: &[T; PARAMETERS]) -> Self {
        Self {
            den: [T::one(), -theta[0], -theta[1]],
            num: [theta[3], theta[4]],
            feedthrough: theta[2],
        }
    }

    /// Steady-state gain of the model.
    pub fn dc_gain(&self) -> T {
        let num = self.feedthrough + self.num[0] + self.num[1];
        let den = self.den[0] + self.den[1] + self.den[2];
        num / den
    }

    /// Q15 coefficients of the delayed part of the model, ready for an
    /// [`IirFilter`](crate::iir::IirFilter) behind a one sample hold.
    pub fn coefficients(&self) -> Coefficients<2, 2> {
        let f = |x: T| x.to_f64().unwrap_or(0.0);
        Coefficients::new(
            [f(self.num[0]), f(self.num[1])],
            [f(self.den[1]), f(self.den[2])],
        )
    }
}

/// Magnitude from which report values switch to exponent notation.
const REPORT_EXP_FROM: f64 = 1e9;

impl<T: Float + fmt::Display + fmt::LowerExp> IdentifiedModel<T> {
    /// Emit the report block, one line per parameter.
    ///
    /// Values of magnitude `1e9` and above are written as `{:e}` so they fit a [`Line`].
    pub fn report(&self, sink: &mut impl DiagnosticSink) {
        sink.emit("Identified system parameters:\n");
        let mut line = Line::new();
        let rows = [
            ("DEN0", &self.den[0]),
            ("DEN1", &self.den[1]),
            ("DEN2", &self.den[2]),
            ("NUM0", &self.num[0]),
            ("NUM1", &self.num[1]),
            ("FEEDTHROUGH", &self.feedthrough),
        ];
        for (name, value) in rows {
            line.clear();
            let large = value.abs().to_f64().is_some_and(|v| v >= REPORT_EXP_FROM);
            let written = if large {
                writeln!(line, "{} = {:e}", name, value)
            } else {
                writeln!(line, "{} = {:.6}", name, value)
            };
            if written.is_err() {
                sink.emit(name);
                sink.emit(" = <overflow>\n");
                continue;
            }
            sink.emit(&line);
        }
    }
}

/// One identification run over `N` samples.
///
/// `T` is the working float type of the solver, `f32` on the board and usually `f64` on a host.
///
/// # Examples
///
/// ```
/// use fixed_control::config::IdentificationConfig;
/// use fixed_control::diagnostics::NullSink;
/// use fixed_control::identification::Identification;
/// use fixed_control::plant::SimulatedBench;
///
/// let mut bench = SimulatedBench::virtual_time();
/// let mut run = Identification::<f64, 400>::new(&IdentificationConfig::default());
/// let model = run.run(&mut bench, &mut NullSink).unwrap();
/// assert!((model.den[1] + 1.263).abs() < 0.1);
/// ```
#[derive(Debug, Clone)]
pub struct Identification<T, const N: usize> {
    phase: Phase,
    config: IdentificationConfig,
    u: Vec<T, N>,
    y: Vec<T, N>,
    phi: Vec<Regressor<T>, N>,
    target: Vec<T, N>,
    gram: Matrix<T, PARAMETERS, PARAMETERS>,
    gram_inv: Matrix<T, PARAMETERS, PARAMETERS>,
    model: Option<IdentifiedModel<T>>,
}

impl<T, const N: usize> Identification<T, N>
where
    T: Float + From<u16> + fmt::Display + fmt::LowerExp,
{
    const ENOUGH_SAMPLES: () = assert!(
        N >= PARAMETERS + 2,
        "identification needs at least as many regressor rows as parameters"
    );

    pub fn new(config: &IdentificationConfig) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::ENOUGH_SAMPLES;
        Self {
            phase: Phase::Idle,
            config: *config,
            u: Vec::new(),
            y: Vec::new(),
            phi: Vec::new(),
            target: Vec::new(),
            gram: [[T::zero(); PARAMETERS]; PARAMETERS],
            gram_inv: [[T::zero(); PARAMETERS]; PARAMETERS],
            model: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Excitation samples in volts.
    pub fn excitation(&self) -> &[T] {
        &self.u
    }

    /// Measured response in volts.
    pub fn response(&self) -> &[T] {
        &self.y
    }

    /// `ΦᵀΦ`, available once inverted.
    pub fn gram(&self) -> &Matrix<T, PARAMETERS, PARAMETERS> {
        &self.gram
    }

    pub fn model(&self) -> Option<&IdentifiedModel<T>> {
        self.model.as_ref()
    }

    /// Clear all buffers and return to [`Phase::Idle`].
    pub fn reset(&mut self) {
        *self = Self::new(&self.config);
    }

    fn require(&self, expected: Phase) -> Result<(), IdentificationError> {
        if self.phase != expected {
            return Err(IdentificationError::OutOfOrder {
                expected,
                actual: self.phase,
            });
        }
        Ok(())
    }

    fn advance(&mut self, phase: Phase) {
        debug!("identification {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn fail(&mut self, e: IdentificationError) -> IdentificationError {
        error!("identification failed: {}", e);
        self.advance(Phase::Failed);
        e
    }

    fn level(volts: f64) -> T {
        <T as NumCast>::from(volts).unwrap_or_else(T::zero)
    }

    /// Fill the excitation buffer with `N` PRBS levels.
    pub fn excite(&mut self) -> Result<(), IdentificationError> {
        self.require(Phase::Idle)?;
        let high = Self::level(self.config.high_volts);
        let low = Self::level(self.config.low_volts);
        self.u.clear();
        for level in Prbs::new(self.config.seed).levels(high, low).take(N) {
            // take(N) never overflows the buffer
            let _ = self.u.push(level);
        }
        self.advance(Phase::Exciting);
        Ok(())
    }

    /// Drive the excitation through the plant and sample its response.
    ///
    /// Each sample is written to output channel one, the task then waits one period and reads
    /// input channel one.
    pub fn acquire<B>(&mut self, board: &mut B) -> Result<(), IdentificationError>
    where
        B: AnalogIo + Scheduler,
    {
        self.require(Phase::Exciting)?;
        let period = self.config.sample_period_ticks();
        let thousand = <T as From<u16>>::from(1000);

        self.y.clear();
        let mut last_wake = board.now();
        for &u in &self.u {
            board.write_output(Channel::One, volts_to_mv(u));
            board.delay_until(&mut last_wake, period);
            let mv = board.read_input(Channel::One);
            let _ = self.y.push(<T as From<u16>>::from(mv) / thousand);
        }
        self.advance(Phase::Acquiring);
        Ok(())
    }

    /// Take excitation and response from a recording instead of the plant.
    pub fn load(&mut self, u: &[T], y: &[T]) -> Result<(), IdentificationError> {
        self.require(Phase::Idle)?;
        for len in [u.len(), y.len()] {
            if len != N {
                return Err(IdentificationError::SampleCount {
                    expected: N,
                    actual: len,
                });
            }
        }
        self.u.clear();
        self.y.clear();
        // lengths are checked against the capacity above
        let _ = self.u.extend_from_slice(u);
        let _ = self.y.extend_from_slice(y);
        self.advance(Phase::Acquiring);
        Ok(())
    }

    /// Build the regressor rows and targets from the samples.
    pub fn regress(&mut self) -> Result<(), IdentificationError> {
        self.require(Phase::Acquiring)?;
        let (u, y) = (&self.u, &self.y);
        self.phi.clear();
        self.target.clear();
        for i in 2..N {
            // N - 2 rows always fit in capacity N
            let _ = self.phi.push([y[i - 1], y[i - 2], u[i], u[i - 1], u[i - 2]]);
            let _ = self.target.push(y[i]);
        }
        self.advance(Phase::Regressing);
        Ok(())
    }

    /// Form `ΦᵀΦ` and invert it.
    pub fn invert(&mut self) -> Result<(), IdentificationError> {
        self.require(Phase::Regressing)?;
        self.gram = gram(&self.phi);
        match invert(&self.gram) {
            Ok(inv) => self.gram_inv = inv,
            Err(e) => return Err(self.fail(e.into())),
        }
        self.advance(Phase::Inverting);
        Ok(())
    }

    /// Solve for `θ` and split it into the transfer function.
    pub fn estimate(&mut self) -> Result<IdentifiedModel<T>, IdentificationError> {
        self.require(Phase::Inverting)?;
        let theta = mat_vec(&self.gram_inv, &transpose_mul_vec(&self.phi, &self.target));
        if !theta.iter().all(|x| x.is_finite()) {
            return Err(self.fail(IdentificationError::NonFiniteEstimate));
        }
        let model = IdentifiedModel::from_theta(&theta);
        self.model = Some(model);
        self.advance(Phase::Estimating);
        Ok(model)
    }

    /// Emit the identified model to the diagnostics sink.
    pub fn report(&mut self, sink: &mut impl DiagnosticSink) -> Result<(), IdentificationError> {
        self.require(Phase::Estimating)?;
        if let Some(model) = &self.model {
            model.report(sink);
        }
        self.advance(Phase::Done);
        Ok(())
    }

    /// Run the whole sequence against a board: settle, excite, acquire, fit and report.
    pub fn run<B>(
        &mut self,
        board: &mut B,
        sink: &mut impl DiagnosticSink,
    ) -> Result<IdentifiedModel<T>, IdentificationError>
    where
        B: AnalogIo + Scheduler,
    {
        info!(
            "identification of {} samples every {} ms",
            N, self.config.sample_period_ms
        );
        let mut wake = board.now();
        board.delay_until(&mut wake, self.config.settle_ticks());

        self.excite()?;
        self.acquire(board)?;
        self.regress()?;
        self.invert()?;
        let model = self.estimate()?;
        self.report(sink)?;
        Ok(model)
    }

    /// Firmware task body: one run, then the task is parked for good.
    pub fn run_task<B>(mut self, mut board: B, mut sink: impl DiagnosticSink) -> !
    where
        B: AnalogIo + Scheduler,
    {
        if let Err(e) = self.run(&mut board, &mut sink) {
            let mut line = Line::new();
            let _ = writeln!(line, "identification failed: {}", e);
            sink.emit(&line);
        }
        board.park()
    }
}
