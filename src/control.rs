//! Periodic control tasks.
//!
//! A [`Strategy`] is chosen at start-up and turned into a [`Controller`], which a [`ControlLoop`]
//! then drives once per sampling period: sample, compute, actuate, log and wait for the next
//! deadline.  All four strategies follow a square-wave reference.

use core::fmt;
use core::str::FromStr;

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analog::{mv_to_q15, q15_to_mv, volts_to_mv, AnalogIo, Channel};
use crate::config::LoopConfig;
use crate::diagnostics::{DiagnosticSink, LoopRecord};
use crate::iir::{Coefficients, Compensator};
use crate::pole_placement::{Observer, PolePlacementConfig};
use crate::scheduler::{Scheduler, Tick};
use crate::Q15;

/// Control strategy of the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "std", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Square wave applied straight to the plant.
    OpenLoop,
    /// PID-equivalent IIR compensator on the output error.
    Filter,
    /// State feedback on the two measured plant states.
    PolePlacement,
    /// State feedback on the Luenberger observer estimate.
    PolePlacementObserved,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::OpenLoop,
        Strategy::Filter,
        Strategy::PolePlacement,
        Strategy::PolePlacementObserved,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Strategy::OpenLoop => "open-loop",
            Strategy::Filter => "filter",
            Strategy::PolePlacement => "pole-placement",
            Strategy::PolePlacementObserved => "pole-placement-observed",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown control strategy")]
pub struct ParseStrategyError;

impl FromStr for Strategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.name() == s)
            .ok_or(ParseStrategyError)
    }
}

/// Two-level reference toggling every `half_period` samples.
#[derive(Debug, Clone, PartialEq)]
pub struct SquareReference<T> {
    levels: [T; 2],
    index: usize,
    count: u32,
    half_period: u32,
}

impl<T: Copy> SquareReference<T> {
    /// Starts on `high`.
    pub fn new(high: T, low: T, half_period: u32) -> Self {
        Self {
            levels: [high, low],
            index: 0,
            count: 0,
            half_period,
        }
    }

    pub fn current(&self) -> T {
        self.levels[self.index]
    }

    /// Count one sample, switching level once `half_period` samples have passed.
    pub fn advance(&mut self) {
        self.count += 1;
        if self.count >= self.half_period {
            self.count = 0;
            self.index ^= 1;
        }
    }

    pub fn reset(&mut self) {
        self.index = 0;
        self.count = 0;
    }
}

/// Work done by a control task in one sampling period.
pub trait PeriodicStep {
    /// Sample the plant, compute and apply the command, and report what happened.
    fn step<IO: AnalogIo>(&mut self, io: &mut IO, tick: Tick) -> LoopRecord;

    /// Return to the start-up state.
    fn reset(&mut self);
}

/// Square wave on the plant input, no feedback.
#[derive(Debug, Clone)]
pub struct OpenLoop {
    reference: SquareReference<u16>,
}

impl OpenLoop {
    pub fn new(config: &LoopConfig) -> Self {
        Self {
            reference: SquareReference::new(
                config.reference_high_mv,
                config.reference_low_mv,
                config.half_period_samples(),
            ),
        }
    }
}

impl PeriodicStep for OpenLoop {
    fn step<IO: AnalogIo>(&mut self, io: &mut IO, tick: Tick) -> LoopRecord {
        let u = self.reference.current();
        io.write_output(Channel::One, u);
        let measured = io.read_input(Channel::One);
        self.reference.advance();
        LoopRecord {
            tick,
            reference: i32::from(u),
            output: i32::from(u),
            measured: i32::from(measured),
        }
    }

    fn reset(&mut self) {
        self.reference.reset();
    }
}

/// IIR compensator acting on `gain * r - y` in Q15.
#[derive(Debug, Clone)]
pub struct FilterLoop {
    compensator: Compensator,
    reference: SquareReference<Q15>,
    gain: i32,
}

impl FilterLoop {
    pub fn new(config: &LoopConfig) -> Self {
        Self {
            compensator: Compensator::new(Coefficients::pid_compensator()),
            reference: SquareReference::new(
                mv_to_q15(config.reference_high_mv),
                mv_to_q15(config.reference_low_mv),
                config.half_period_samples(),
            ),
            gain: config.reference_gain,
        }
    }

    pub fn compensator(&self) -> &Compensator {
        &self.compensator
    }
}

impl PeriodicStep for FilterLoop {
    fn step<IO: AnalogIo>(&mut self, io: &mut IO, tick: Tick) -> LoopRecord {
        let measured = io.read_input(Channel::One);
        let r = self.reference.current();
        let error = r
            .saturating_mul_int(self.gain)
            .saturating_sub(mv_to_q15(measured));
        let u = q15_to_mv(self.compensator.step(error));
        io.write_output(Channel::One, u);
        self.reference.advance();
        LoopRecord {
            tick,
            reference: i32::from(q15_to_mv(r)),
            output: i32::from(u),
            measured: i32::from(measured),
        }
    }

    fn reset(&mut self) {
        self.compensator.reset();
        self.reference.reset();
    }
}

fn volts(millivolts: u16) -> f64 {
    f64::from(millivolts) / 1000.0
}

fn reference_levels(config: &LoopConfig) -> SquareReference<f64> {
    SquareReference::new(
        volts(config.reference_high_mv),
        volts(config.reference_low_mv),
        config.half_period_samples(),
    )
}

/// State feedback with the plant states measured on both input channels.
#[derive(Debug, Clone)]
pub struct PolePlacementLoop {
    gains: PolePlacementConfig,
    reference: SquareReference<f64>,
}

impl PolePlacementLoop {
    pub fn new(config: &LoopConfig) -> Self {
        Self {
            gains: config.pole_placement,
            reference: reference_levels(config),
        }
    }
}

impl PeriodicStep for PolePlacementLoop {
    fn step<IO: AnalogIo>(&mut self, io: &mut IO, tick: Tick) -> LoopRecord {
        let state = [
            volts(io.read_input(Channel::One)),
            volts(io.read_input(Channel::Two)),
        ];
        let r = self.reference.current();
        let u = volts_to_mv(self.gains.control(&state, r));
        io.write_output(Channel::One, u);
        let measured = io.read_input(Channel::One);
        self.reference.advance();
        LoopRecord {
            tick,
            reference: i32::from(volts_to_mv(r)),
            output: i32::from(u),
            measured: i32::from(measured),
        }
    }

    fn reset(&mut self) {
        self.reference.reset();
    }
}

/// State feedback on the observer estimate, with only the plant output measured.
#[derive(Debug, Clone)]
pub struct ObservedLoop {
    observer: Observer,
    reference: SquareReference<f64>,
}

impl ObservedLoop {
    pub fn new(config: &LoopConfig) -> Self {
        Self {
            observer: Observer::new(config.observed),
            reference: reference_levels(config),
        }
    }

    pub fn observer(&self) -> &Observer {
        &self.observer
    }
}

impl PeriodicStep for ObservedLoop {
    fn step<IO: AnalogIo>(&mut self, io: &mut IO, tick: Tick) -> LoopRecord {
        let y = volts(io.read_input(Channel::One));
        let r = self.reference.current();
        let u = self.observer.config().control(&self.observer.estimate(), r);
        io.write_output(Channel::One, volts_to_mv(u));
        self.observer.observe(u, y);
        let measured = io.read_input(Channel::One);
        self.reference.advance();
        LoopRecord {
            tick,
            reference: i32::from(volts_to_mv(r)),
            // the command before the converter clamps it
            output: (u * 1000.0) as i32,
            measured: i32::from(measured),
        }
    }

    fn reset(&mut self) {
        self.observer.reset();
        self.reference.reset();
    }
}

/// The controller selected at start-up.
#[derive(Debug, Clone)]
pub enum Controller {
    OpenLoop(OpenLoop),
    Filter(FilterLoop),
    PolePlacement(PolePlacementLoop),
    PolePlacementObserved(ObservedLoop),
}

impl Controller {
    pub fn new(strategy: Strategy, config: &LoopConfig) -> Self {
        match strategy {
            Strategy::OpenLoop => Controller::OpenLoop(OpenLoop::new(config)),
            Strategy::Filter => Controller::Filter(FilterLoop::new(config)),
            Strategy::PolePlacement => Controller::PolePlacement(PolePlacementLoop::new(config)),
            Strategy::PolePlacementObserved => {
                Controller::PolePlacementObserved(ObservedLoop::new(config))
            }
        }
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            Controller::OpenLoop(_) => Strategy::OpenLoop,
            Controller::Filter(_) => Strategy::Filter,
            Controller::PolePlacement(_) => Strategy::PolePlacement,
            Controller::PolePlacementObserved(_) => Strategy::PolePlacementObserved,
        }
    }
}

impl PeriodicStep for Controller {
    fn step<IO: AnalogIo>(&mut self, io: &mut IO, tick: Tick) -> LoopRecord {
        match self {
            Controller::OpenLoop(c) => c.step(io, tick),
            Controller::Filter(c) => c.step(io, tick),
            Controller::PolePlacement(c) => c.step(io, tick),
            Controller::PolePlacementObserved(c) => c.step(io, tick),
        }
    }

    fn reset(&mut self) {
        match self {
            Controller::OpenLoop(c) => c.reset(),
            Controller::Filter(c) => c.reset(),
            Controller::PolePlacement(c) => c.reset(),
            Controller::PolePlacementObserved(c) => c.reset(),
        }
    }
}

/// Drives a controller once per period on absolute deadlines.
#[derive(Debug, Clone)]
pub struct ControlLoop<C> {
    controller: C,
    period: Tick,
    last_wake: Option<Tick>,
    iterations: u64,
}

impl<C: PeriodicStep> ControlLoop<C> {
    pub fn new(controller: C, period: Tick) -> Self {
        Self {
            controller,
            period,
            last_wake: None,
            iterations: 0,
        }
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    /// Completed sampling periods.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    fn iterate<B, S>(&mut self, board: &mut B, sink: &mut S)
    where
        B: AnalogIo + Scheduler,
        S: DiagnosticSink,
    {
        let mut wake = match self.last_wake {
            Some(wake) => wake,
            None => {
                info!("control loop started, period {} ticks", self.period);
                board.now()
            }
        };
        let tick = board.now();
        let record = self.controller.step(board, tick);
        sink.emit(&record.to_line());
        self.iterations += 1;
        board.delay_until(&mut wake, self.period);
        self.last_wake = Some(wake);
    }

    /// Run `n` sampling periods and return.
    pub fn run_for<B, S>(&mut self, board: &mut B, sink: &mut S, n: usize)
    where
        B: AnalogIo + Scheduler,
        S: DiagnosticSink,
    {
        for _ in 0..n {
            self.iterate(board, sink);
        }
    }

    /// Firmware task body.
    pub fn run<B, S>(mut self, mut board: B, mut sink: S) -> !
    where
        B: AnalogIo + Scheduler,
        S: DiagnosticSink,
    {
        loop {
            self.iterate(&mut board, &mut sink);
        }
    }

    /// Restart the controller and the deadline sequence.
    pub fn reset(&mut self) {
        self.controller.reset();
        self.last_wake = None;
        self.iterations = 0;
    }
}
