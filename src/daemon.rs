use anyhow::{Context, Result};
use jbdbms_lib::bms::{Bms, Snapshot};
use jbdbms_lib::transport::{Clock, Transport};
use log::{error, info, warn};
use serde_json::json;
use std::time::{Duration, Instant};

use crate::commandline;

pub fn print_snapshot(snapshot: &Snapshot) {
    println!("Voltage:           {:.2} V", snapshot.voltage);
    println!("Current:           {:.2} A", snapshot.current);
    println!("Balance capacity:  {:.2} Ah", snapshot.balance_capacity);
    println!("Rate capacity:     {:.2} Ah", snapshot.rate_capacity);
    println!("Cycle count:       {}", snapshot.cycle_count);
    if let Some(date) = &snapshot.production_date {
        println!("Production date:   {date}");
    }
    if let Some(version) = &snapshot.software_version {
        println!("Software version:  {version}");
    }
    println!("State of charge:   {}%", snapshot.state_of_charge);
    println!(
        "Charge MOSFET:     {}",
        if snapshot.charge_mosfet { "ON" } else { "OFF" }
    );
    println!(
        "Discharge MOSFET:  {}",
        if snapshot.discharge_mosfet { "ON" } else { "OFF" }
    );
    println!("Temperatures:");
    for (i, temperature) in snapshot.temperatures.iter().enumerate() {
        println!("  #{:<2} {temperature:.1} °C", i + 1);
    }
    println!("Cell voltages:");
    for (i, (voltage, balancing)) in snapshot
        .cell_voltages
        .iter()
        .zip(&snapshot.balancing)
        .enumerate()
    {
        println!(
            "  #{:<2} {voltage:.3} V {}",
            i + 1,
            if *balancing { "(balancing)" } else { "" }
        );
    }
    let active = snapshot.protection.active();
    if active.is_empty() {
        println!("Protection:        none");
    } else {
        println!("Protection:");
        for flag in active {
            println!("  {flag}");
        }
    }
    if let Some(counts) = &snapshot.fault_counts {
        for (flag, count) in counts.iter().filter(|(_, count)| *count > 0) {
            println!("  {flag}: {count} times");
        }
    }
    if let Some(name) = &snapshot.name {
        println!("Name:              {name}");
    }
    println!("RX errors:         {}", snapshot.rx_errors);
}

fn report(snapshot: &Snapshot, output: &commandline::DaemonOutput) -> Result<()> {
    match output {
        commandline::DaemonOutput::Console => {
            println!("--- Data at {} ---", chrono::Local::now().to_rfc3339());
            if snapshot.comm_error {
                println!("BMS is not responding, showing last known values");
            }
            print_snapshot(snapshot);
            println!("--------------------------");
        }
        commandline::DaemonOutput::Json => {
            let document = json!({
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "bms": snapshot,
            });
            let line = serde_json::to_string(&document)
                .with_context(|| "Failed to serialize data to JSON string")?;
            println!("{line}");
        }
    }
    Ok(())
}

pub fn run<T: Transport, C: Clock>(
    mut bms: Bms<T, C>,
    output: commandline::DaemonOutput,
    interval: Duration,
) -> Result<()> {
    info!(
        "Starting daemon mode: output={output:?}, interval={interval:?}, query interval={:?}",
        bms.query_interval()
    );
    let tick = bms.config().rx_tick;
    let mut last_report = Instant::now();
    let mut was_failing = false;
    bms.start();

    loop {
        if let Err(e) = bms.poll() {
            error!("Error polling BMS: {e}");
        }

        let failing = bms.get_comm_error_state();
        if failing && !was_failing {
            warn!("BMS stopped responding");
        } else if !failing && was_failing {
            info!("BMS communication restored");
        }
        was_failing = failing;

        if last_report.elapsed() >= interval {
            if let Err(e) = report(&bms.snapshot(), &output) {
                error!("Failed to report data: {e:#}");
            }
            last_report = Instant::now();
        }
        std::thread::sleep(tick);
    }
}
