//! Simulated analog plant.
//!
//! The plant is the second order [`plant_model`](crate::iir::Coefficients::plant_model) filter
//! sitting behind the Q15 conversion path of the analog adapter.  It advances one sample per
//! scheduler period; [`SimulatedBench`] couples it to a scheduler so that every deadline reached by
//! the control task also steps the plant.

use log::trace;

use crate::analog::{mv_to_q15, q15_to_mv, AnalogIo, Channel};
use crate::iir::{Coefficients, PlantModel};
use crate::scheduler::{Scheduler, Tick, VirtualClock};
use crate::Q15;

/// Discrete plant driven through a zero-order hold.
///
/// A value written to the DAC is held until the next period boundary and only reaches the plant
/// on the step after that, so the response to a write shows up one period late, as it does on the
/// real converters.
#[derive(Debug, Clone)]
pub struct SimulatedPlant {
    model: PlantModel,
    input: Q15,
    held: Q15,
    output: Q15,
}

impl SimulatedPlant {
    pub fn new(model: PlantModel) -> Self {
        Self {
            model,
            input: Q15::ZERO,
            held: Q15::ZERO,
            output: Q15::ZERO,
        }
    }

    /// Advance the plant by one sampling period.
    pub fn tick(&mut self) {
        self.output = self.model.step(self.held);
        self.held = self.input;
    }

    /// Latest plant output.
    pub fn output(&self) -> Q15 {
        self.output
    }

    /// Return the plant to rest.
    pub fn reset(&mut self) {
        self.model.reset();
        self.input = Q15::ZERO;
        self.held = Q15::ZERO;
        self.output = Q15::ZERO;
    }
}

impl Default for SimulatedPlant {
    fn default() -> Self {
        Self::new(PlantModel::new(Coefficients::plant_model()))
    }
}

impl AnalogIo for SimulatedPlant {
    fn write_output(&mut self, channel: Channel, millivolts: u16) {
        trace!("plant input {:?} <- {} mV", channel, millivolts);
        self.input = mv_to_q15(millivolts);
    }

    /// Both channels observe the single plant output.
    fn read_input(&mut self, _channel: Channel) -> u16 {
        q15_to_mv(self.output)
    }
}

/// A simulated plant paced by a scheduler.
///
/// Every period that elapses while a task waits in [`delay_until`](Scheduler::delay_until) steps
/// the plant once.
#[derive(Debug, Clone)]
pub struct SimulatedBench<S> {
    plant: SimulatedPlant,
    scheduler: S,
    last_step: Tick,
}

impl SimulatedBench<VirtualClock> {
    /// Default plant on a virtual clock.
    pub fn virtual_time() -> Self {
        Self::new(SimulatedPlant::default(), VirtualClock::new())
    }
}

impl<S: Scheduler> SimulatedBench<S> {
    pub fn new(plant: SimulatedPlant, scheduler: S) -> Self {
        let last_step = scheduler.now();
        Self {
            plant,
            scheduler,
            last_step,
        }
    }

    pub fn plant(&self) -> &SimulatedPlant {
        &self.plant
    }

    pub fn plant_mut(&mut self) -> &mut SimulatedPlant {
        &mut self.plant
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }
}

impl<S> AnalogIo for SimulatedBench<S> {
    fn write_output(&mut self, channel: Channel, millivolts: u16) {
        self.plant.write_output(channel, millivolts)
    }

    fn read_input(&mut self, channel: Channel) -> u16 {
        self.plant.read_input(channel)
    }
}

impl<S: Scheduler> Scheduler for SimulatedBench<S> {
    fn now(&self) -> Tick {
        self.scheduler.now()
    }

    fn delay_until(&mut self, last_wake: &mut Tick, period: Tick) {
        self.scheduler.delay_until(last_wake, period);
        if period == 0 {
            return;
        }
        let elapsed = self.scheduler.now().wrapping_sub(self.last_step);
        for _ in 0..elapsed / period {
            self.plant.tick();
        }
        self.last_step = self
            .last_step
            .wrapping_add(elapsed - elapsed % period);
    }

    fn park(&mut self) -> ! {
        self.scheduler.park()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_reaches_output_one_period_late() {
        let mut plant = SimulatedPlant::default();
        plant.write_output(Channel::One, 1000);
        plant.tick();
        assert_eq!(plant.output(), Q15::ZERO);
        plant.tick();
        assert_eq!(plant.output().to_bits(), (1630 * 9930) >> 15);
    }

    #[test]
    fn settles_to_input() {
        let mut plant = SimulatedPlant::default();
        plant.write_output(Channel::One, 1500);
        for _ in 0..1000 {
            plant.tick();
        }
        let mv = plant.read_input(Channel::One);
        assert!((1480..=1510).contains(&mv), "settled at {} mV", mv);
        assert_eq!(plant.read_input(Channel::Two), mv);

        plant.reset();
        assert_eq!(plant.read_input(Channel::One), 0);
    }

    #[test]
    fn bench_steps_once_per_period() {
        let mut bench = SimulatedBench::virtual_time();
        bench.write_output(Channel::One, 1000);
        let mut wake = bench.now();
        bench.delay_until(&mut wake, 5);
        bench.delay_until(&mut wake, 5);
        assert_eq!(bench.plant().output().to_bits(), (1630 * 9930) >> 15);
        assert_eq!(bench.now(), 10);
    }

    #[test]
    fn late_deadline_does_not_step() {
        let mut bench = SimulatedBench::new(SimulatedPlant::default(), VirtualClock::starting_at(100));
        bench.write_output(Channel::One, 1000);
        let mut wake = 0;
        bench.delay_until(&mut wake, 5);
        assert_eq!(wake, 5);
        assert_eq!(bench.now(), 100);
        assert_eq!(bench.plant().output(), Q15::ZERO);
    }
}
