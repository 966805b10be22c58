//! Query orchestrator: the single owner of the device state.
//!
//! The driver never spawns threads. The host calls [`Bms::poll`] from its
//! main loop as often as it can; the driver then feeds received bytes into the
//! framer and issues the periodic queries on its own schedule.

use crate::config::Config;
use crate::framer::Framer;
use crate::protocol::{
    BasicInfo, CellVoltages, DeviceName, FaultCounts, MosfetControl, ProductionDate,
    ProtectionStatus, SoftwareVersion,
};
use crate::state::{DeviceState, Liveness};
use crate::transport::{Clock, Transport};
use crate::Result;
use std::time::Duration;

#[cfg(feature = "protocol_serde")]
use serde::Serialize;

const RX_CHUNK: usize = 64;

/// Converted view of the device state, for presentation.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize))]
pub struct Snapshot {
    pub voltage: f32,
    pub current: f32,
    pub balance_capacity: f32,
    pub rate_capacity: f32,
    pub cycle_count: u16,
    pub production_date: Option<ProductionDate>,
    pub software_version: Option<SoftwareVersion>,
    pub state_of_charge: u8,
    pub charge_mosfet: bool,
    pub discharge_mosfet: bool,
    pub cell_voltages: Vec<f32>,
    pub balancing: Vec<bool>,
    pub temperatures: Vec<f32>,
    pub protection: ProtectionStatus,
    pub fault_counts: Option<FaultCounts>,
    pub name: Option<String>,
    pub comm_error: bool,
    pub rx_errors: u32,
}

pub struct Bms<T: Transport, C: Clock> {
    transport: T,
    clock: C,
    config: Config,
    started: bool,
    framer: Framer,
    state: DeviceState,
    decode_errors: u32,
    last_query_ms: u64,
    last_rx_ms: u64,
}

impl<T: Transport, C: Clock> Bms<T, C> {
    pub fn new(transport: T, clock: C, config: Config) -> Self {
        Self {
            framer: Framer::new(config.max_payload_len),
            state: DeviceState::new(&config),
            transport,
            clock,
            config,
            started: false,
            decode_errors: 0,
            last_query_ms: 0,
            last_rx_ms: 0,
        }
    }

    /// Starts processing. Timers and liveness restart from the current time.
    pub fn start(&mut self) {
        let now = self.clock.now_ms();
        log::debug!("Starting BMS driver at {now} ms");
        self.framer.reset();
        self.last_query_ms = now;
        self.last_rx_ms = now;
        self.state.restart_liveness(now);
        self.started = true;
    }

    /// Stops querying and processing; the last known state stays readable.
    pub fn stop(&mut self) {
        log::debug!("Stopping BMS driver");
        self.started = false;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Call this as often as possible from the host's control loop.
    pub fn poll(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        let now = self.clock.now_ms();
        if now.saturating_sub(self.last_rx_ms) >= self.rx_tick_ms() {
            self.receive()?;
            self.last_rx_ms = now;
        }
        if now.saturating_sub(self.last_query_ms) >= self.query_interval_ms() {
            self.send(&BasicInfo::request())?;
            self.send(&CellVoltages::request())?;
            self.last_query_ms = now;
        }
        Ok(())
    }

    pub fn set_query_interval(&mut self, interval: Duration) {
        log::trace!("set query interval to {interval:?}");
        self.config.query_interval = interval;
    }

    pub fn query_interval(&self) -> Duration {
        self.config.query_interval
    }

    fn query_interval_ms(&self) -> u64 {
        self.config.query_interval.as_millis() as u64
    }

    fn rx_tick_ms(&self) -> u64 {
        self.config.rx_tick.as_millis() as u64
    }

    /// True if either register went unanswered for twice the query interval.
    pub fn get_comm_error_state(&self) -> bool {
        let now = self.clock.now_ms();
        let limit = self.query_interval_ms().saturating_mul(2);
        [
            self.state.basic_info_liveness(),
            self.state.cell_voltages_liveness(),
        ]
        .iter()
        .any(|liveness| now.saturating_sub(liveness.last_accepted_ms) >= limit)
    }

    /// Rejected bytes, frames and undecodable payloads since construction.
    pub fn get_rx_error_count(&self) -> u32 {
        self.framer.errors().saturating_add(self.decode_errors)
    }

    fn send(&mut self, tx_buffer: &[u8]) -> Result<()> {
        log::trace!("write bytes: {tx_buffer:02X?}");
        self.transport.write_all(tx_buffer)?;
        Ok(())
    }

    /// Feeds every currently available byte into the framer.
    fn receive(&mut self) -> Result<()> {
        let mut buf = [0u8; RX_CHUNK];
        loop {
            let pending = self.transport.bytes_to_read()?;
            if pending == 0 {
                break;
            }
            let received = self.transport.read(&mut buf[..pending.min(RX_CHUNK)])?;
            if received == 0 {
                break;
            }
            log::trace!("receive_bytes: {:02X?}", &buf[..received]);
            for frame in self.framer.feed(&buf[..received]) {
                let now = self.clock.now_ms();
                if let Err(err) = self.state.apply(&frame, now) {
                    log::warn!("Cannot decode register 0x{:02X}: {err}", frame.command);
                    self.decode_errors = self.decode_errors.saturating_add(1);
                }
            }
        }
        Ok(())
    }

    /// Drives the receive path until `done` holds or the timeout elapses.
    fn wait_for(&mut self, done: impl Fn(&DeviceState) -> bool) -> Result<bool> {
        let start = self.clock.now_ms();
        let timeout = self.config.timeout.as_millis() as u64;
        loop {
            self.receive()?;
            if done(&self.state) {
                return Ok(true);
            }
            if self.clock.now_ms().saturating_sub(start) >= timeout {
                log::debug!("Timeout after {timeout} ms");
                return Ok(false);
            }
            self.clock.sleep(self.config.rx_tick);
        }
    }

    fn query(&mut self, request: &[u8], liveness: fn(&DeviceState) -> Liveness) -> Result<bool> {
        let sequence = liveness(&self.state).sequence;
        self.send(request)?;
        self.wait_for(|state| liveness(state).sequence != sequence)
    }

    /// Requests the basic info register and waits for the answer.
    ///
    /// Returns `Ok(false)` if no answer arrived within the configured timeout.
    pub fn query_basic_info(&mut self) -> Result<bool> {
        log::trace!("query basic info");
        self.query(&BasicInfo::request(), DeviceState::basic_info_liveness)
    }

    /// Requests the cell voltage register and waits for the answer.
    pub fn query_cell_voltages(&mut self) -> Result<bool> {
        log::trace!("query cell voltages");
        self.query(&CellVoltages::request(), DeviceState::cell_voltages_liveness)
    }

    /// Fetches the device name, empty if the BMS did not answer in time.
    ///
    /// Always empty when name support is disabled in the configuration.
    pub fn fetch_bms_name(&mut self) -> Result<String> {
        log::trace!("query device name");
        if !self.config.options.name {
            return Ok(String::new());
        }
        self.state.clear_bms_name();
        self.send(&DeviceName::request())?;
        self.wait_for(|state| state.get_bms_name().is_some_and(|name| !name.is_empty()))?;
        Ok(self.state.get_bms_name().unwrap_or_default().to_string())
    }

    /// Switches the FETs. Fire and forget, no reply is awaited.
    pub fn set_mosfet_control(&mut self, charge: bool, discharge: bool) -> Result<()> {
        log::trace!("set mosfet control charge={charge} discharge={discharge}");
        self.send(&MosfetControl::request(charge, discharge))
    }

    pub fn get_voltage(&self) -> f32 {
        self.state.get_voltage()
    }

    pub fn get_current(&self) -> f32 {
        self.state.get_current()
    }

    pub fn get_balance_capacity(&self) -> f32 {
        self.state.get_balance_capacity()
    }

    pub fn get_rate_capacity(&self) -> f32 {
        self.state.get_rate_capacity()
    }

    pub fn get_cycle_count(&self) -> u16 {
        self.state.get_cycle_count()
    }

    pub fn get_production_date(&self) -> Option<ProductionDate> {
        self.state.get_production_date()
    }

    pub fn get_balance_status(&self, cell_index: usize) -> bool {
        self.state.get_balance_status(cell_index)
    }

    pub fn get_protection_status(&self) -> ProtectionStatus {
        self.state.get_protection_status()
    }

    pub fn get_protection_status_summary(&self) -> bool {
        self.state.get_protection_status_summary()
    }

    pub fn get_fault_counts(&self) -> Option<FaultCounts> {
        self.state.get_fault_counts().cloned()
    }

    pub fn clear_fault_counts(&mut self) {
        self.state.clear_fault_counts();
    }

    pub fn get_software_version(&self) -> Option<SoftwareVersion> {
        self.state.get_software_version()
    }

    pub fn get_state_of_charge(&self) -> u8 {
        self.state.get_state_of_charge()
    }

    pub fn get_charge_mosfet_status(&self) -> bool {
        self.state.get_charge_mosfet_status()
    }

    pub fn get_discharge_mosfet_status(&self) -> bool {
        self.state.get_discharge_mosfet_status()
    }

    pub fn get_num_cells(&self) -> u8 {
        self.state.get_num_cells()
    }

    pub fn get_num_ntcs(&self) -> u8 {
        self.state.get_num_ntcs()
    }

    pub fn get_ntc_temperature(&self, ntc_index: usize) -> f32 {
        self.state.get_ntc_temperature(ntc_index)
    }

    pub fn get_cell_voltage(&self, cell_index: usize) -> f32 {
        self.state.get_cell_voltage(cell_index)
    }

    /// Last received device name without querying the BMS.
    pub fn get_bms_name(&self) -> Option<&str> {
        self.state.get_bms_name()
    }

    pub fn snapshot(&self) -> Snapshot {
        let n_cells = self.state.max_cells().min(usize::from(self.get_num_cells()));
        let n_ntcs = self.state.max_ntcs().min(usize::from(self.get_num_ntcs()));
        Snapshot {
            voltage: self.get_voltage(),
            current: self.get_current(),
            balance_capacity: self.get_balance_capacity(),
            rate_capacity: self.get_rate_capacity(),
            cycle_count: self.get_cycle_count(),
            production_date: self.get_production_date(),
            software_version: self.get_software_version(),
            state_of_charge: self.get_state_of_charge(),
            charge_mosfet: self.get_charge_mosfet_status(),
            discharge_mosfet: self.get_discharge_mosfet_status(),
            cell_voltages: (0..n_cells).map(|i| self.get_cell_voltage(i)).collect(),
            balancing: (0..n_cells).map(|i| self.get_balance_status(i)).collect(),
            temperatures: (0..n_ntcs).map(|i| self.get_ntc_temperature(i)).collect(),
            protection: self.get_protection_status(),
            fault_counts: self.get_fault_counts(),
            name: self.get_bms_name().map(str::to_string),
            comm_error: self.get_comm_error_state(),
            rx_errors: self.get_rx_error_count(),
        }
    }
}
