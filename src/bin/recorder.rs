//! Terminal front end for the antenna pattern recorder.
//!
//! `interactive` mirrors the desktop buttons (left / stop / right / plot /
//! clear / save / quit); `sweep` records one unattended pass and saves it.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};

use antenna_recorder::config_loader::{self, RecorderSettings};
use antenna_recorder::export::{self, DEFAULT_DECIMALS};
use antenna_recorder::serial_link::available_ports;
use antenna_recorder::sweep::{run_sweep, SweepPlan};
use antenna_recorder::{RunHandle, Sample, SeriesEvent, Turntable};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (defaults to antenna_recorder.yaml next to Cargo.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Host block to read instead of this machine's hostname
    #[arg(long)]
    host: Option<String>,
    /// Serial port, overrides the settings file
    #[arg(long)]
    port: Option<String>,
    #[arg(long)]
    baud: Option<u32>,
    /// Decimal places per value in saved files
    #[arg(long, default_value_t = DEFAULT_DECIMALS)]
    decimals: usize,
    #[arg(long)]
    debug: bool,
    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug, Clone)]
enum Mode {
    /// Console with the recorder buttons (default)
    Interactive,
    /// Home, record one sweep, return home and save the values
    Sweep {
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        max_angle: Option<u32>,
        #[arg(long, default_value_t = 2000)]
        settle_ms: u64,
        /// Stop at the end of the sweep instead of returning to zero
        #[arg(long)]
        no_return: bool,
    },
    /// List serial ports
    Ports,
}

fn load_settings(args: &Args) -> Result<RecorderSettings> {
    let path = args.config.clone().unwrap_or_else(config_loader::default_config_path);
    let host = args.host.clone().unwrap_or_else(config_loader::current_hostname);

    let mut settings = match (&args.port, path.exists()) {
        // A port on the command line is enough to run without a settings file
        (Some(port), false) => {
            log::warn!("No settings file at {}, using defaults", path.display());
            RecorderSettings::new(port.clone())
        }
        _ => config_loader::load_recorder_settings(&path, &host)?,
    };
    config_loader::apply_env_overrides(&mut settings)?;
    if let Some(port) = &args.port {
        settings.link.port = port.clone();
    }
    if let Some(baud) = args.baud {
        settings.link.baud_rate = baud;
    }
    settings.validate()?;
    Ok(settings)
}

fn report<T: std::fmt::Display>(what: &str, result: antenna_recorder::Result<T>) {
    match result {
        Ok(value) => println!("{}: {}", what, value),
        Err(e) => println!("{} failed: {}", what, e),
    }
}

/// Wait for a run and surface a link failure that ended it
fn join_run(handle: RunHandle) {
    let report = handle.join();
    if report.error.is_some() {
        println!("Recording failed: {}", report);
    }
}

fn print_help() {
    println!("Commands:");
    println!("  left | right | stop   rotate the turntable or stop it");
    println!("  plot                  record while the turntable rotates");
    println!("  clear                 clear the recorded values");
    println!("  save [path]           write values, one per line");
    println!("  status                show link and motor state");
    println!("  quit                  stop the motor, close the port and exit");
}

/// Prints samples as they arrive and keeps the last finished run for `save`
fn spawn_display(table: &Turntable, last_run: Arc<Mutex<Vec<Sample>>>) {
    let events = table.subscribe();
    thread::spawn(move || {
        for event in events {
            match event {
                SeriesEvent::Recorded(sample) => {
                    println!("  {:>4}  {:.3} V", sample.angle, sample.value);
                }
                SeriesEvent::Cleared => println!("  (cleared)"),
                SeriesEvent::RunFinished { outcome, samples } => {
                    println!("Run finished ({:?}), {} values", outcome, samples.len());
                    if let Ok(mut last) = last_run.lock() {
                        *last = samples;
                    }
                }
            }
        }
    });
}

fn interactive(table: Arc<Turntable>, decimals: usize) -> Result<()> {
    let last_run: Arc<Mutex<Vec<Sample>>> = Arc::new(Mutex::new(Vec::new()));
    spawn_display(&table, Arc::clone(&last_run));

    let on_interrupt = Arc::clone(&table);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = on_interrupt.shutdown();
        std::process::exit(130);
    }) {
        log::warn!("Could not install Ctrl-C handler: {}", e);
    }

    let max_angle = table.acquisition_settings().max_angle;
    let mut current: Option<RunHandle> = None;
    print_help();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else { continue };

        if current.as_ref().is_some_and(RunHandle::is_finished) {
            if let Some(done) = current.take() {
                join_run(done);
            }
        }

        match cmd {
            "left" => report("left rotation", table.rotate_left()),
            "right" => report("right rotation", table.rotate_right()),
            "stop" => report("stop", table.request_stop()),
            "plot" | "record" => {
                match table.start_acquisition(max_angle) {
                    Ok(Some(handle)) => {
                        println!("Recording angles 0..={}", max_angle);
                        current = Some(handle);
                    }
                    Ok(None) if table.is_running() => println!("Already recording"),
                    Ok(None) => println!("Motor is {}; rotate left or right first", table.motor_state()),
                    Err(e) => println!("plot failed: {}", e),
                }
            }
            "clear" => {
                table.clear();
                if let Ok(mut last) = last_run.lock() {
                    last.clear();
                }
            }
            "save" => {
                let path = words
                    .next()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| export::timestamped_path(Path::new(".")));
                let samples = if table.is_running() {
                    table.snapshot()
                } else {
                    last_run.lock().map(|s| s.clone()).unwrap_or_default()
                };
                if samples.is_empty() {
                    println!("Nothing to save");
                } else if let Err(e) = export::save_values(&path, &samples, decimals) {
                    println!("save failed: {:#}", e);
                } else {
                    println!("Saved {} values to {}", samples.len(), path.display());
                }
            }
            "status" => {
                println!(
                    "port {} ({}), motor {}, {}, {} values",
                    table.port_name(),
                    if table.is_open() { "open" } else { "closed" },
                    table.motor_state(),
                    if table.is_running() { "recording" } else { "idle" },
                    table.snapshot().len()
                );
            }
            "help" | "?" => print_help(),
            "quit" | "exit" => break,
            other => println!("Unknown command '{}', type help", other),
        }
        io::stdout().flush()?;
    }

    if let Err(e) = table.shutdown() {
        log::warn!("Stop on exit failed: {}", e);
    }
    if let Some(handle) = current {
        join_run(handle);
    }
    Ok(())
}

fn sweep(
    table: Arc<Turntable>,
    output: Option<PathBuf>,
    max_angle: Option<u32>,
    settle_ms: u64,
    no_return: bool,
    decimals: usize,
) -> Result<()> {
    let on_interrupt = Arc::clone(&table);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = on_interrupt.request_stop();
    }) {
        log::warn!("Could not install Ctrl-C handler: {}", e);
    }

    let mut plan = SweepPlan::from_settings(table.acquisition_settings());
    if let Some(max) = max_angle {
        plan.max_angle = max;
    }
    plan.settle = Duration::from_millis(settle_ms);
    plan.return_home = !no_return;

    let report = run_sweep(&table, &plan).context("Sweep failed")?;
    for sample in &report.samples {
        println!("{:>4}  {:.3}", sample.angle, sample.value);
    }
    println!("Sweep {}", report);

    if !report.samples.is_empty() {
        let path = output.unwrap_or_else(|| export::timestamped_path(Path::new(".")));
        export::save_values(&path, &report.samples, decimals)?;
        println!("Saved to {}", path.display());
    }
    table.close();

    match report.error {
        Some(e) => Err(anyhow!(e).context("Sweep ended by link failure")),
        None => Ok(()),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let mode = args.mode.clone().unwrap_or(Mode::Interactive);
    if let Mode::Ports = mode {
        let ports = available_ports();
        if ports.is_empty() {
            println!("No serial ports found");
        }
        for port in ports {
            println!("{}", port);
        }
        return Ok(());
    }

    let settings = load_settings(&args)?;
    log::info!("Using {} @{} baud", settings.link.port, settings.link.baud_rate);
    let table = Arc::new(Turntable::with_system_port(settings)?);

    match mode {
        Mode::Interactive => interactive(table, args.decimals),
        Mode::Sweep { output, max_angle, settle_ms, no_return } => {
            sweep(table, output, max_angle, settle_ms, no_return, args.decimals)
        }
        Mode::Ports => Ok(()),
    }
}
