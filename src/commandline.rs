use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

fn cell_capacity(s: &str) -> Result<usize, String> {
    clap_num::number_range(s, 1, 32)
}

fn ntc_capacity(s: &str) -> Result<usize, String> {
    clap_num::number_range(s, 0, 16)
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Show pack voltage, current, capacities, cycles, SOC and MOSFET state
    Info,
    /// Show individual cell voltages and balancing state
    CellVoltages,
    /// Show individual temperature sensor readings
    Temperatures,
    /// Show active protections and the number of faults seen while running
    Protection,
    /// Show the device name
    Name,
    /// Show all available BMS information
    All,
    /// Enable or disable the charge and discharge MOSFETs
    SetMosfet {
        /// Enable the charge MOSFET. If this flag is not present, it will be disabled.
        #[clap(long, short, action)]
        charge: bool,
        /// Enable the discharge MOSFET. If this flag is not present, it will be disabled.
        #[clap(long, short, action)]
        discharge: bool,
    },
    /// Run in daemon mode, polling the BMS continuously and reporting periodically
    Daemon {
        /// Output format for the reports
        #[command(subcommand)]
        output: DaemonOutput,
        /// Interval between two reports (e.g., "10s", "1m")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "10s")]
        interval: Duration,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Print human readable reports to the standard output (console).
    Console,
    /// Print one JSON document per report to the standard output.
    Json,
}

const fn about_text() -> &'static str {
    "JBD / Overkill Solar BMS command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Serial port device path (e.g., /dev/ttyUSB0 on Linux, COM1 on Windows)
    #[arg(short, long, default_value_t = default_device_name())]
    pub device: String,

    #[command(subcommand)]
    pub command: CliCommands,

    /// YAML file with driver settings; command line options take precedence
    #[arg(long)]
    pub config: Option<String>,

    /// Time to wait for a reply (e.g., "500ms", "1s", "2s 500ms")
    #[arg(value_parser = humantime::parse_duration, long)]
    pub timeout: Option<Duration>,

    /// Interval between two queries of the BMS (e.g., "1s", "500ms")
    #[arg(value_parser = humantime::parse_duration, long)]
    pub query_interval: Option<Duration>,

    /// Number of cell voltages to keep (1-32)
    #[arg(long, value_parser = cell_capacity)]
    pub max_cells: Option<usize>,

    /// Number of temperature sensors to keep (0-16)
    #[arg(long, value_parser = ntc_capacity)]
    pub max_ntcs: Option<usize>,
}
