use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use confique::Config;
use log::info;
use pico_daq::{get_serials, read_file, run_daq, sim::SimDriver, Channel, Driver, RunConfig};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};
use std::{fs::OpenOptions, path::Path, path::PathBuf, str::FromStr};
use time::macros::format_description;

#[derive(Parser, Debug)]
#[command(version, about = "Rapid block acquisition for PicoScope 6000 series units")]
struct Cli {
    /// Use a simulated unit instead of libps6000
    #[arg(long, global = true)]
    simulate: bool,
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture one run and write it to a data file
    Run {
        /// Run configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,
        /// Data file to write
        #[arg(short, long)]
        output: PathBuf,
    },
    /// List serial numbers of connected units
    Serials,
    /// Print the header of a data file, optionally one waveform in mV
    Inspect {
        file: PathBuf,
        /// Per-channel pulse minimum and peak index statistics
        #[arg(long)]
        summary: bool,
        /// Moving average half width applied before the summary
        #[arg(long, default_value_t = 0, requires = "summary")]
        smooth: usize,
        #[arg(long, requires = "waveform")]
        channel: Option<char>,
        #[arg(long, requires = "channel")]
        waveform: Option<usize>,
    },
    /// Print a commented configuration template
    Template,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, output } => {
            let conf = RunConfig::builder()
                .env()
                .file(&config)
                .load()
                .with_context(|| format!("loading {}", config.display()))?;
            let level = LevelFilter::from_str(&conf.logging.level)
                .with_context(|| format!("bad log level {:?}", conf.logging.level))?;
            init_logging(verbosity(level, cli.verbose), conf.logging.file.as_deref())?;

            let acquisition = conf.acquisition();
            info!("configuration: {acquisition:?}");
            if cli.simulate {
                record(&SimDriver::new(), &output, &acquisition)
            } else {
                record(&hardware()?, &output, &acquisition)
            }
        }
        Command::Serials => {
            init_logging(verbosity(LevelFilter::Warn, cli.verbose), None)?;
            if cli.simulate {
                list_serials(&SimDriver::new())
            } else {
                list_serials(&hardware()?)
            }
        }
        Command::Inspect {
            file,
            summary,
            smooth,
            channel,
            waveform,
        } => {
            init_logging(verbosity(LevelFilter::Warn, cli.verbose), None)?;
            inspect(&file, summary.then_some(smooth), channel.zip(waveform))
        }
        Command::Template => {
            print!(
                "{}",
                confique::toml::template::<RunConfig>(confique::toml::FormatOptions::default())
            );
            Ok(())
        }
    }
}

fn record<D: Driver>(driver: &D, output: &Path, config: &pico_daq::AcquisitionConfig) -> Result<()> {
    run_daq(driver, output, config).context("acquisition failed")?;
    let written = std::fs::metadata(output)
        .with_context(|| format!("reading size of {}", output.display()))?
        .len();
    println!("Wrote {} ({written} bytes)", output.display());
    Ok(())
}

fn list_serials<D: Driver>(driver: &D) -> Result<()> {
    let list = get_serials(driver).context("listing units")?;
    println!("Units found:\t{}", list.count);
    for serial in list.serials() {
        println!("{serial}");
    }
    Ok(())
}

fn inspect(path: &Path, smooth: Option<usize>, dump: Option<(char, usize)>) -> Result<()> {
    let data = read_file(path).with_context(|| format!("reading {}", path.display()))?;
    let header = &data.header;
    println!("Model:\t\t{}", header.model);
    println!("Serial:\t\t{}", header.serial);
    println!("Timebase:\t{}", header.timebase);
    println!("Waveforms:\t{}", header.waveforms);
    println!("Pre-trigger:\t{}", header.pre_trigger);
    if header.active_triggers.contains(pico_daq::TriggerMask::AUX) {
        println!("Aux trigger:\t{} ADC", header.aux_threshold);
    }
    for ch in Channel::ALL {
        let Some(range) = header.ranges[ch.index()] else {
            println!("Channel {ch}:\toff");
            continue;
        };
        let trigger = if header.active_triggers.contains(ch.trigger()) {
            format!("trigger {} ADC", header.thresholds[ch.index()])
        } else {
            "no trigger".to_owned()
        };
        println!(
            "Channel {ch}:\t{range}\t{} samples/waveform\t{trigger}",
            header.total_samples[ch.index()]
        );
    }

    if let Some(smooth) = smooth {
        for ch in header.active_channels.channels() {
            let Some(s) = data.summary(ch, smooth) else {
                continue;
            };
            println!(
                "Channel {ch}:\tmean minimum {:.3} mV at index {:.1}\tdeepest {:.3} mV (waveform {}, index {})",
                s.mean_minimum_mv,
                s.mean_peak_index,
                s.deepest.millivolts,
                s.deepest_waveform,
                s.deepest.index
            );
        }
    }

    if let Some((letter, waveform)) = dump {
        let channel = match letter.to_ascii_uppercase() {
            'A' => Channel::A,
            'B' => Channel::B,
            'C' => Channel::C,
            'D' => Channel::D,
            other => bail!("no channel {other}"),
        };
        let samples = data
            .millivolts(channel, waveform)
            .with_context(|| format!("channel {channel} has no waveform {waveform}"))?;
        for mv in samples {
            println!("{mv:.3}");
        }
    }
    Ok(())
}

fn verbosity(base: LevelFilter, verbose: u8) -> LevelFilter {
    match verbose {
        0 => base,
        1 => base.max(LevelFilter::Debug),
        _ => LevelFilter::Trace,
    }
}

fn init_logging(level: LevelFilter, file: Option<&Path>) -> Result<()> {
    let config = ConfigBuilder::new()
        .set_time_format_custom(format_description!(
            "[hour]:[minute]:[second].[subsecond digits:3]"
        ))
        .build();
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    if let Some(path) = file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        loggers.push(WriteLogger::new(level, config, file));
    }
    CombinedLogger::init(loggers)?;
    Ok(())
}

#[cfg(feature = "ps6000")]
fn hardware() -> Result<pico_daq::Ps6000Driver> {
    Ok(pico_daq::Ps6000Driver)
}

#[cfg(not(feature = "ps6000"))]
fn hardware() -> Result<SimDriver> {
    bail!("built without the `ps6000` feature; rebuild with it or pass --simulate")
}
