//! CLI Entry Point for the NI 660X simulator
//!
//! Drives both controllers through a complete acquisition against mock
//! channels, the way an orchestrating framework would, and prints the data
//! collected per axis.
//!
//! # Usage
//!
//! Software-triggered acquisition, one start per point:
//! ```bash
//! ni660x_sim --mode software --repetitions 3 --integration-time 0.1
//! ```
//!
//! Hardware-triggered acquisition clocked by the trigger/gate channel:
//! ```bash
//! ni660x_sim --config config/ni660x.toml --mode hardware --repetitions 10
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use ni660x_ctrl::config::ControllerConfig;
use ni660x_ctrl::counter::{AxisData, CounterTimerEngine};
use ni660x_ctrl::hardware::mock::{MockCard, MockChannel, MockConnector};
use ni660x_ctrl::logging;
use ni660x_ctrl::sync::{AcqSynch, State, SynchDescriptor, SynchGroup, TIMER_AXIS};
use ni660x_ctrl::trigger_gate::TriggerGateEngine;

const DEFAULT_COUNTERS: &str = "sim/ni660x/ctr0,sim/ni660x/ctr1,sim/ni660x/ctr2";
const DEFAULT_GENERATOR: &str = "sim/ni660x/ctr7";

/// Polls before a simulated acquisition is declared stuck.
const MAX_POLLS: usize = 10_000;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Software triggered: the timer axis times each point
    Software,
    /// Hardware triggered: the trigger/gate channel clocks the counters
    Hardware,
}

#[derive(Parser)]
#[command(name = "ni660x_sim")]
#[command(about = "Simulated NI 660X counter/timer acquisition", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Points to acquire
    #[arg(long, default_value_t = 5)]
    repetitions: usize,

    /// Integration time per point, in seconds
    #[arg(long, default_value_t = 0.1)]
    integration_time: f64,

    /// Synchronization of the acquisition
    #[arg(long, value_enum, default_value_t = Mode::Hardware)]
    mode: Mode,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    dump_config: bool,
}

/// Mock hardware wired to the configured device names.
struct Bench {
    counters: Vec<MockChannel>,
    generator: MockChannel,
    connector: MockConnector,
    buffer_attr: &'static str,
    clock_source_attr: &'static str,
}

impl Bench {
    fn new(config: &ControllerConfig) -> Self {
        let profile = config.counter_timer.variant.build().profile();
        let mut connector = MockConnector::new();
        let mut counters = Vec::new();
        for (index, name) in config.counter_timer.channel_names().iter().enumerate() {
            let app_type = if index + 1 == TIMER_AXIS {
                "COPulseChanTime"
            } else {
                profile.application_type
            };
            let channel = MockChannel::counter("Dev1", &format!("ctr{index}"), app_type);
            if !name.is_empty() {
                connector = connector.with_channel(name, channel.clone());
            }
            counters.push(channel);
        }

        let generator = MockChannel::counter("Dev1", "ctr7", "COPulseChanTime");
        for name in config.trigger_gate.channel_names() {
            if name.is_empty() {
                continue;
            }
            connector = connector.with_channel(&name, generator.clone());
        }

        let cards = config
            .counter_timer
            .connect_terms
            .0
            .keys()
            .chain(config.trigger_gate.connect_terms.0.keys());
        for card in cards {
            connector = connector.with_card(card, MockCard::new());
        }

        Self {
            counters,
            generator,
            connector,
            buffer_attr: profile.buffer_attr,
            clock_source_attr: profile.clock_source_attr,
        }
    }

    /// Route every counter's sample clock to `source`.
    fn set_clock_source(&self, counter: &mut CounterTimerEngine, source: &str) -> Result<()> {
        for (axis, _) in self.counter_channels() {
            counter.set_extra_attribute(axis, self.clock_source_attr, source.into())?;
        }
        Ok(())
    }

    /// Counter channels, without the timer.
    fn counter_channels(&self) -> impl Iterator<Item = (usize, &MockChannel)> {
        self.counters.iter().enumerate().skip(1).map(|(i, c)| (i + 1, c))
    }
}

fn sample(axis: usize, point: usize) -> f64 {
    (axis * 100 + point) as f64
}

fn load_config(cli: &Cli) -> Result<ControllerConfig> {
    let mut config = match &cli.config {
        Some(path) => ControllerConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ControllerConfig::default(),
    };
    if config.counter_timer.channel_dev_names.trim().is_empty() {
        config.counter_timer.channel_dev_names = DEFAULT_COUNTERS.to_string();
    }
    if config.trigger_gate.channel_dev_names.trim().is_empty() {
        config.trigger_gate.channel_dev_names = DEFAULT_GENERATOR.to_string();
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if cli.dump_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    let bench = Bench::new(&config);
    let mut counter = CounterTimerEngine::from_config(
        &config.counter_timer,
        config.hardware,
        Box::new(bench.connector.clone()),
    );
    let axes: Vec<usize> = (1..=bench.counters.len()).collect();
    for &axis in &axes {
        counter.add_axis(axis)?;
    }

    let data = match cli.mode {
        Mode::Software => run_software(&cli, &bench, &mut counter, &axes)?,
        Mode::Hardware => run_hardware(&cli, &config, &bench, &mut counter, &axes)?,
    };

    for (axis, points) in &data {
        println!("axis {axis}: {points:?}");
    }
    Ok(())
}

/// One load/start/read cycle per point.
fn run_software(
    cli: &Cli,
    bench: &Bench,
    counter: &mut CounterTimerEngine,
    axes: &[usize],
) -> Result<BTreeMap<usize, Vec<f64>>> {
    counter.set_synchronization(AcqSynch::SoftwareTrigger);
    bench.set_clock_source(counter, "/Dev1/Ctr0InternalOutput")?;
    let mut data: BTreeMap<usize, Vec<f64>> = BTreeMap::new();

    for point in 0..cli.repetitions {
        counter.load(TIMER_AXIS, cli.integration_time, 1, 0.0)?;
        counter.prepare_all()?;
        for &axis in axes {
            counter.prepare_axis(axis, cli.integration_time)?;
        }
        counter.start_all()?;
        for &axis in axes.iter().rev() {
            counter.start_axis(axis, cli.integration_time)?;
        }

        // The card stores a duplicate first sample for single-point counts.
        for (axis, channel) in bench.counter_channels() {
            channel.set_buffer(bench.buffer_attr, vec![0.0, sample(axis, point)]);
            channel.finish();
        }
        wait_until_on(counter, axes)?;

        for &axis in axes {
            if let AxisData::Scalar(value) = counter.read_axis(axis)? {
                data.entry(axis).or_default().push(value);
            }
        }
        info!(point, "point acquired");
    }
    Ok(data)
}

/// A single buffered acquisition clocked by the trigger/gate channel.
fn run_hardware(
    cli: &Cli,
    config: &ControllerConfig,
    bench: &Bench,
    counter: &mut CounterTimerEngine,
    axes: &[usize],
) -> Result<BTreeMap<usize, Vec<f64>>> {
    let mut generator = TriggerGateEngine::new(
        &config.trigger_gate,
        config.hardware,
        Box::new(bench.connector.clone()),
    );
    generator.add_axis(1)?;
    let latency = config.counter_timer.latency_time;
    let total = cli.integration_time + latency;
    generator.configure(
        1,
        &SynchDescriptor::single(SynchGroup::new(0.0, cli.integration_time, total, cli.repetitions as u64)),
    )?;

    counter.set_synchronization(AcqSynch::HardwareTrigger);
    bench.set_clock_source(counter, "/Dev1/PFI39")?;
    counter.load(TIMER_AXIS, cli.integration_time, cli.repetitions, latency)?;
    counter.prepare_all()?;
    generator.prepare_all()?;
    for &axis in axes {
        counter.prepare_axis(axis, cli.integration_time)?;
    }
    generator.prepare_axis(1)?;
    counter.start_all()?;
    for &axis in axes.iter().rev() {
        counter.start_axis(axis, cli.integration_time)?;
    }
    generator.start(1)?;

    let mut data: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
    let mut produced = 0;
    for _ in 0..MAX_POLLS {
        if produced < cli.repetitions {
            for (axis, channel) in bench.counter_channels() {
                channel.push_samples(bench.buffer_attr, &[sample(axis, produced)]);
            }
            produced += 1;
            if produced == cli.repetitions {
                bench.generator.finish();
                for (_, channel) in bench.counter_channels() {
                    channel.finish();
                }
            }
        }
        for &axis in axes {
            let points = counter.read_axis(axis)?;
            data.entry(axis).or_default().extend_from_slice(points.points());
        }
        let (state, status) = generator.query_state(1)?;
        let counting = axes
            .iter()
            .map(|&axis| counter.query_state(axis).map(|(s, _)| s))
            .collect::<Result<Vec<_>, _>>()?;
        if state == State::On && counting.iter().all(|s| *s == State::On) {
            info!(%status, "acquisition finished");
            return Ok(data);
        }
    }
    bail!("acquisition did not finish after {MAX_POLLS} polls")
}

fn wait_until_on(counter: &CounterTimerEngine, axes: &[usize]) -> Result<()> {
    for _ in 0..MAX_POLLS {
        let mut idle = true;
        for &axis in axes {
            idle &= counter.query_state(axis)?.0 == State::On;
        }
        if idle {
            return Ok(());
        }
    }
    bail!("counters did not finish after {MAX_POLLS} polls")
}
