use anyhow::{bail, Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use jbdbms_lib::serialport::SerialTransport;
use jbdbms_lib::transport::SystemClock;
use jbdbms_lib::Bms;
use log::*;
use std::{ops::Deref, panic};

mod commandline;
mod daemon;
mod settings;

use commandline::{CliArgs, CliCommands};

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

type SerialBms = Bms<SerialTransport, SystemClock>;

fn query_basic_info(bms: &mut SerialBms) -> Result<()> {
    if !bms
        .query_basic_info()
        .with_context(|| "Cannot query basic info")?
    {
        bail!("No basic info reply within {:?}", bms.config().timeout);
    }
    Ok(())
}

fn query_cell_voltages(bms: &mut SerialBms) -> Result<()> {
    if !bms
        .query_cell_voltages()
        .with_context(|| "Cannot query cell voltages")?
    {
        bail!("No cell voltage reply within {:?}", bms.config().timeout);
    }
    Ok(())
}

fn print_info(bms: &SerialBms) {
    println!("Voltage:          {:.2} V", bms.get_voltage());
    println!("Current:          {:.2} A", bms.get_current());
    println!("Balance capacity: {:.2} Ah", bms.get_balance_capacity());
    println!("Rate capacity:    {:.2} Ah", bms.get_rate_capacity());
    println!("Cycle count:      {}", bms.get_cycle_count());
    println!("State of charge:  {}%", bms.get_state_of_charge());
    println!(
        "MOSFETs:          charge={} discharge={}",
        bms.get_charge_mosfet_status(),
        bms.get_discharge_mosfet_status()
    );
    println!(
        "Cells: {}  Temperature sensors: {}",
        bms.get_num_cells(),
        bms.get_num_ntcs()
    );
}

fn print_cell_voltages(bms: &SerialBms) {
    let n_cells = bms.config().max_cells.min(usize::from(bms.get_num_cells()));
    for i in 0..n_cells {
        println!(
            "Cell #{:<2} {:.3} V{}",
            i + 1,
            bms.get_cell_voltage(i),
            if bms.get_balance_status(i) {
                " (balancing)"
            } else {
                ""
            }
        );
    }
}

fn print_temperatures(bms: &SerialBms) {
    let n_ntcs = bms.config().max_ntcs.min(usize::from(bms.get_num_ntcs()));
    for i in 0..n_ntcs {
        println!("Sensor #{:<2} {:.1} °C", i + 1, bms.get_ntc_temperature(i));
    }
}

fn print_protection(bms: &SerialBms) {
    let active = bms.get_protection_status().active();
    if active.is_empty() {
        println!("No protection active");
    }
    for flag in active {
        println!("Active: {flag}");
    }
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let config = settings::build(&args)?;
    let transport = SerialTransport::open(&args.device, config.timeout)
        .with_context(|| format!("Cannot open serial port '{}'", args.device))?;
    let mut bms = Bms::new(transport, SystemClock::new(), config);

    match args.command {
        CliCommands::Info => {
            query_basic_info(&mut bms)?;
            print_info(&bms);
        }
        CliCommands::CellVoltages => {
            query_basic_info(&mut bms)?;
            query_cell_voltages(&mut bms)?;
            print_cell_voltages(&bms);
        }
        CliCommands::Temperatures => {
            query_basic_info(&mut bms)?;
            print_temperatures(&bms);
        }
        CliCommands::Protection => {
            query_basic_info(&mut bms)?;
            print_protection(&bms);
        }
        CliCommands::Name => {
            let name = bms.fetch_bms_name().with_context(|| "Cannot get name")?;
            if name.is_empty() {
                warn!("No name received within {:?}", bms.config().timeout);
            }
            println!("Name: {name}");
        }
        CliCommands::All => {
            query_basic_info(&mut bms)?;
            query_cell_voltages(&mut bms)?;
            bms.fetch_bms_name().with_context(|| "Cannot get name")?;
            daemon::print_snapshot(&bms.snapshot());
        }
        CliCommands::SetMosfet { charge, discharge } => bms
            .set_mosfet_control(charge, discharge)
            .with_context(|| "Cannot set mosfet control")?,
        CliCommands::Daemon { output, interval } => daemon::run(bms, output, interval)?,
    }

    Ok(())
}
