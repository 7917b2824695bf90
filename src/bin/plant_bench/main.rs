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

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};

use fixed_control::config::LoopConfig;
use fixed_control::control::{ControlLoop, Controller, Strategy};
use fixed_control::diagnostics::WriterSink;
use fixed_control::identification::{Identification, DEFAULT_SAMPLES};
use fixed_control::plant::{SimulatedBench, SimulatedPlant};
use fixed_control::scheduler::{Scheduler, StdScheduler, VirtualClock};

mod logger;

#[derive(Debug, Parser)]
#[command(name = "plant-bench")]
#[command(about = "Run the control and identification tasks against a simulated analog plant")]
struct Cli {
    /// TOML file overriding the firmware defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Pace the tasks with the wall clock instead of virtual time
    #[arg(long, global = true, default_value_t = false)]
    realtime: bool,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a control strategy and print one CSV line per sampling period
    Control {
        #[arg(long, value_enum)]
        strategy: Option<Strategy>,

        #[arg(long, default_value_t = 400)]
        iterations: usize,
    },
    /// Identify an ARX(2,2) model of the plant
    Identify,
}

fn load_config(path: Option<&Path>) -> Result<LoopConfig> {
    let config = match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        }
        None => LoopConfig::default(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn control<S: Scheduler>(
    bench: &mut SimulatedBench<S>,
    config: &LoopConfig,
    strategy: Strategy,
    iterations: usize,
) {
    info!("running {} for {} periods", strategy, iterations);
    let controller = Controller::new(strategy, config);
    let mut control_loop = ControlLoop::new(controller, config.sample_period_ticks());
    let mut sink = WriterSink::new(io::stdout().lock());
    control_loop.run_for(bench, &mut sink, iterations);
}

fn identify<S: Scheduler>(bench: &mut SimulatedBench<S>, config: &LoopConfig) -> Result<()> {
    let mut run = Identification::<f64, DEFAULT_SAMPLES>::new(&config.identification);
    let mut sink = WriterSink::new(io::stdout().lock());
    let model = run
        .run(bench, &mut sink)
        .context("identification of the simulated plant failed")?;
    info!("identified dc gain {:.4}", model.dc_gain());
    Ok(())
}

fn dispatch<S: Scheduler>(
    mut bench: SimulatedBench<S>,
    config: &LoopConfig,
    command: Command,
) -> Result<()> {
    match command {
        Command::Control {
            strategy,
            iterations,
        } => {
            control(
                &mut bench,
                config,
                strategy.unwrap_or(config.strategy),
                iterations,
            );
            Ok(())
        }
        Command::Identify => identify(&mut bench, config),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    logger::init_log(match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    });

    let config = load_config(cli.config.as_deref())?;

    if cli.realtime {
        dispatch(
            SimulatedBench::new(SimulatedPlant::default(), StdScheduler::new()),
            &config,
            cli.command,
        )
    } else {
        dispatch(
            SimulatedBench::new(SimulatedPlant::default(), VirtualClock::new()),
            &config,
            cli.command,
        )
    }
}
