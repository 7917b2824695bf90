// Copyright 2023 Enphase Energy, Inc.
//
//    Licensed under the Apache License, Version 2.0 (the "License");
//    you may not use this file except in compliance with the License.
//    You may obtain a copy of the License at
//
//        http://www.apache.org/licenses/LICENSE-2.0
//
//    Unless required by applicable law or agreed to in writing, software
//    distributed under the License is distributed on an "AS IS" BASIS,
//    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//    See the License for the specific language governing permissions and
//    limitations under the License.

/*!
# `fixed-control`

Fixed-point control and system identification for a single-input single-output analog plant.

`fixed-control` is a `#![no_std]` library for running digital controllers against a plant that is
reached through a DAC/ADC pair and paced by a periodic real-time scheduler.  It provides:

1.  a Q15 [IIR filter](crate::iir::IirFilter) used both as a PID-equivalent compensator and as a
    simulated plant model,
2.  a [pole-placement](crate::pole_placement) state-feedback law with an optional Luenberger
    observer,
3.  a small [Gauss-Jordan](crate::linalg::invert) matrix inverse, and
4.  an [identification engine](crate::identification::Identification) that excites the plant with
    a PRBS and fits an ARX(2,2) model by least squares.

The scheduler, the converters and the diagnostics channel are external to the crate and are
reached through the [`Scheduler`](crate::scheduler::Scheduler),
[`AnalogIo`](crate::analog::AnalogIo) and [`DiagnosticSink`](crate::diagnostics::DiagnosticSink)
traits.

# How to use

The filter runs on Q15 samples carried in an `i32` (the [`Q15`] type).  Coefficients are passed as
floating point numbers and converted once at construction.

```rust
use fixed_control::iir::{Coefficients, IirFilter};
use fixed_control::Q15;

let mut compensator = IirFilter::new(Coefficients::pid_compensator());

let error = Q15::from_num(0.25);
let u = compensator.step(error);
assert_eq!(u, error); // b0 is unity, so the first output is the error itself
```

A control strategy is selected at start-up and driven once per sampling period by a
[`ControlLoop`](crate::control::ControlLoop):

```rust
use fixed_control::config::LoopConfig;
use fixed_control::control::{ControlLoop, Controller, Strategy};
use fixed_control::diagnostics::NullSink;
use fixed_control::plant::SimulatedBench;

let config = LoopConfig::default();
let controller = Controller::new(Strategy::Filter, &config);
let mut control_loop = ControlLoop::new(controller, config.sample_period_ticks());

let mut bench = SimulatedBench::virtual_time();
control_loop.run_for(&mut bench, &mut NullSink, 200);
assert_eq!(control_loop.iterations(), 200);
```

# Numeric range

Filter products are formed with a 64-bit accumulator.  When a result leaves the configured output
range it is saturated and the filter raises a sticky flag, see
[`IirFilter::saturated`](crate::iir::IirFilter::saturated).
*/
#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod analog;
pub mod config;
pub mod control;
pub mod diagnostics;
pub mod identification;
pub mod iir;
pub mod linalg;
pub mod plant;
pub mod pole_placement;
pub mod scheduler;

pub use analog::{AnalogIo, Channel};
pub use control::{ControlLoop, Controller, Strategy};
pub use identification::{IdentificationError, IdentifiedModel};
pub use iir::{Coefficients, IirFilter};
pub use linalg::LinalgError;
pub use pole_placement::{Observer, PolePlacementConfig};
pub use scheduler::Scheduler;

/// Q15 fixed-point sample, 15 fractional bits carried in an `i32`.
///
/// The integer part leaves head room above 1.0 so that an error signal such as `2r - y` fits.
pub type Q15 = fixed::types::I17F15;

/// Number of fractional bits of [`Q15`].
pub const Q15_SHIFT: u32 = 15;
