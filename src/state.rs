//! Telemetry decoder and the device state it maintains.
//!
//! Values are kept in the raw units sent by the BMS and converted when read.

use crate::config::{Config, Options};
use crate::protocol::{
    BasicInfo, CellVoltages, DeviceName, FaultCounts, Frame, ProductionDate, ProtectionStatus,
    Register, SoftwareVersion,
};
use crate::Result;

/// Time and sequence number of the last accepted frame of a register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Liveness {
    pub last_accepted_ms: u64,
    pub sequence: u32,
}

impl Liveness {
    fn accept(&mut self, now_ms: u64) {
        self.last_accepted_ms = now_ms;
        self.sequence = self.sequence.wrapping_add(1);
    }

    pub fn restart(&mut self, now_ms: u64) {
        self.last_accepted_ms = now_ms;
    }
}

#[derive(Debug, Clone)]
pub struct DeviceState {
    options: Options,
    voltage: u16,
    current: i16,
    balance_capacity: u16,
    rate_capacity: u16,
    cycle_count: u16,
    production_date: Option<u16>,
    balance_status: u32,
    protection_status: ProtectionStatus,
    fault_counts: Option<FaultCounts>,
    software_version: Option<u8>,
    remaining_soc: u8,
    mosfet_status: u8,
    num_cells: u8,
    num_ntcs: u8,
    ntc_temps: Box<[u16]>,
    cell_voltages: Box<[u16]>,
    name: Option<String>,
    basic_info: Liveness,
    cells: Liveness,
}

impl DeviceState {
    pub fn new(config: &Config) -> Self {
        let options = config.options.clone();
        Self {
            voltage: 0,
            current: 0,
            balance_capacity: 0,
            rate_capacity: 0,
            cycle_count: 0,
            production_date: options.production_date.then_some(0),
            balance_status: 0,
            protection_status: ProtectionStatus::default(),
            fault_counts: options.fault_counts.then(FaultCounts::default),
            software_version: options.software_version.then_some(0),
            remaining_soc: 0,
            mosfet_status: 0,
            num_cells: 0,
            num_ntcs: 0,
            ntc_temps: vec![0; config.max_ntcs].into_boxed_slice(),
            cell_voltages: vec![0; config.max_cells].into_boxed_slice(),
            name: options.name.then(String::new),
            basic_info: Liveness::default(),
            cells: Liveness::default(),
            options,
        }
    }

    /// Applies a verified frame, dispatching on its register.
    ///
    /// Unknown registers are ignored. On a decode error the state is left untouched.
    pub fn apply(&mut self, frame: &Frame, now_ms: u64) -> Result<()> {
        match Register::from_code(frame.command) {
            Some(Register::BasicInfo) => {
                let info = BasicInfo::decode(&frame.payload, self.ntc_temps.len())?;
                self.apply_basic_info(info);
                self.basic_info.accept(now_ms);
            }
            Some(Register::CellVoltages) => {
                let n_cells = self.cell_voltages.len().min(usize::from(self.num_cells));
                let voltages = CellVoltages::decode(&frame.payload, n_cells)?;
                self.cell_voltages[..n_cells].copy_from_slice(&voltages);
                self.cells.accept(now_ms);
            }
            Some(Register::Name) if self.options.name => {
                self.name = Some(DeviceName::decode(&frame.payload));
            }
            _ => log::debug!("Skipping register 0x{:02X}", frame.command),
        }
        Ok(())
    }

    fn apply_basic_info(&mut self, info: BasicInfo) {
        self.voltage = info.voltage;
        self.current = info.current;
        self.balance_capacity = info.balance_capacity;
        self.rate_capacity = info.rate_capacity;
        self.cycle_count = info.cycle_count;
        if self.options.production_date {
            self.production_date = Some(info.production_date);
        }
        self.balance_status = info.balance_status;
        if let Some(counts) = self.fault_counts.as_mut() {
            counts.record(self.protection_status, info.protection_status);
        }
        self.protection_status = info.protection_status;
        if self.options.software_version {
            self.software_version = Some(info.software_version);
        }
        self.remaining_soc = info.remaining_soc;
        self.mosfet_status = info.mosfet_status;
        self.num_cells = info.num_cells;
        self.num_ntcs = info.num_ntcs;
        self.ntc_temps[..info.ntc_temps.len()].copy_from_slice(&info.ntc_temps);
    }

    pub fn basic_info_liveness(&self) -> Liveness {
        self.basic_info
    }

    pub fn cell_voltages_liveness(&self) -> Liveness {
        self.cells
    }

    pub fn restart_liveness(&mut self, now_ms: u64) {
        self.basic_info.restart(now_ms);
        self.cells.restart(now_ms);
    }

    /// Total voltage in volts.
    pub fn get_voltage(&self) -> f32 {
        f32::from(self.voltage) * 0.01
    }

    /// Current in amperes, positive while charging.
    pub fn get_current(&self) -> f32 {
        f32::from(self.current) * 0.01
    }

    /// Balance capacity in ampere hours.
    pub fn get_balance_capacity(&self) -> f32 {
        f32::from(self.balance_capacity) * 0.01
    }

    /// Rated capacity in ampere hours.
    pub fn get_rate_capacity(&self) -> f32 {
        f32::from(self.rate_capacity) * 0.01
    }

    pub fn get_cycle_count(&self) -> u16 {
        self.cycle_count
    }

    pub fn get_production_date(&self) -> Option<ProductionDate> {
        self.production_date.map(ProductionDate::from)
    }

    pub fn get_balance_status(&self, cell_index: usize) -> bool {
        cell_index < Config::BALANCE_BITS && (self.balance_status >> cell_index) & 1 != 0
    }

    pub fn get_balance_bitmap(&self) -> u32 {
        self.balance_status
    }

    pub fn get_protection_status(&self) -> ProtectionStatus {
        self.protection_status
    }

    pub fn get_protection_status_summary(&self) -> bool {
        self.protection_status.any()
    }

    pub fn get_fault_counts(&self) -> Option<&FaultCounts> {
        self.fault_counts.as_ref()
    }

    pub fn clear_fault_counts(&mut self) {
        if let Some(counts) = self.fault_counts.as_mut() {
            counts.clear();
        }
    }

    pub fn get_software_version(&self) -> Option<SoftwareVersion> {
        self.software_version.map(SoftwareVersion::from)
    }

    /// Remaining capacity in percent, reported as is (may exceed 100).
    pub fn get_state_of_charge(&self) -> u8 {
        self.remaining_soc
    }

    pub fn get_charge_mosfet_status(&self) -> bool {
        self.mosfet_status & 1 != 0
    }

    pub fn get_discharge_mosfet_status(&self) -> bool {
        (self.mosfet_status >> 1) & 1 != 0
    }

    pub fn get_num_cells(&self) -> u8 {
        self.num_cells
    }

    pub fn get_num_ntcs(&self) -> u8 {
        self.num_ntcs
    }

    pub fn max_cells(&self) -> usize {
        self.cell_voltages.len()
    }

    pub fn max_ntcs(&self) -> usize {
        self.ntc_temps.len()
    }

    /// Temperature in degrees Celsius, NaN for indices beyond capacity.
    pub fn get_ntc_temperature(&self, ntc_index: usize) -> f32 {
        match self.ntc_temps.get(ntc_index) {
            Some(deci_kelvin) => f32::from(*deci_kelvin) * 0.1 - 273.15,
            None => f32::NAN,
        }
    }

    /// Cell voltage in volts, NaN for indices beyond capacity.
    pub fn get_cell_voltage(&self, cell_index: usize) -> f32 {
        match self.cell_voltages.get(cell_index) {
            Some(millivolt) => f32::from(*millivolt) * 0.001,
            None => f32::NAN,
        }
    }

    /// Last received device name, `None` if name support is disabled.
    pub fn get_bms_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn clear_bms_name(&mut self) {
        if let Some(name) = self.name.as_mut() {
            name.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ProtectionFlag, STATUS_OK};

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() < 1e-3,
            "expected {expected}, got {actual}"
        );
    }

    fn frame(command: u8, payload: &[u8]) -> Frame {
        Frame {
            command,
            status: STATUS_OK,
            payload: payload.to_vec(),
        }
    }

    const BASIC_INFO: [u8; 27] = [
        0x0a, 0x28, // 26.00 V
        0xff, 0x9c, // -1.00 A
        0x13, 0x88, // 50.00 Ah
        0x27, 0x10, // 100.00 Ah
        0x00, 0x2a, // 42 cycles
        0x2a, 0x6f, // 2021-03-15
        0x00, 0x05, // cells 0 and 2 balancing
        0x00, 0x01, // cell 16 balancing
        0x00, 0x04, // whole pack overvoltage
        0x21, // version 2.1
        0x55, // 85 %
        0x03, // both FETs on
        0x04, // 4 cells
        0x02, // 2 NTCs
        0x0b, 0xa5, // 2981 dK
        0x0b, 0x6e, // 2926 dK
    ];

    fn all_options() -> Config {
        Config {
            options: Options {
                production_date: true,
                software_version: true,
                name: true,
                fault_counts: true,
            },
            ..Config::default()
        }
    }

    #[test]
    fn decodes_basic_info_payload() {
        let mut state = DeviceState::new(&all_options());
        state.apply(&frame(0x03, &BASIC_INFO), 1234).unwrap();

        assert_close(state.get_voltage(), 26.0);
        assert_close(state.get_current(), -1.0);
        assert_close(state.get_balance_capacity(), 50.0);
        assert_close(state.get_rate_capacity(), 100.0);
        assert_eq!(state.get_cycle_count(), 42);
        assert_eq!(
            state.get_production_date(),
            Some(ProductionDate {
                year: 2021,
                month: 3,
                day: 15
            })
        );
        assert!(state.get_balance_status(0));
        assert!(!state.get_balance_status(1));
        assert!(state.get_balance_status(2));
        assert!(state.get_balance_status(16));
        assert!(!state.get_balance_status(32));
        assert_eq!(
            state.get_protection_status().active(),
            vec![ProtectionFlag::WholePackOvervoltage]
        );
        assert!(state.get_protection_status_summary());
        assert_eq!(
            state.get_software_version(),
            Some(SoftwareVersion { major: 2, minor: 1 })
        );
        assert_eq!(state.get_state_of_charge(), 85);
        assert!(state.get_charge_mosfet_status());
        assert!(state.get_discharge_mosfet_status());
        assert_eq!(state.get_num_cells(), 4);
        assert_eq!(state.get_num_ntcs(), 2);
        assert_close(state.get_ntc_temperature(0), 24.95);
        assert_close(state.get_ntc_temperature(1), 19.45);
        assert_eq!(state.basic_info_liveness().last_accepted_ms, 1234);
        assert_eq!(state.basic_info_liveness().sequence, 1);
    }

    #[test]
    fn disabled_options_are_not_stored() {
        let mut state = DeviceState::new(&Config {
            options: Options {
                production_date: false,
                software_version: false,
                name: false,
                fault_counts: false,
            },
            ..Config::default()
        });
        state.apply(&frame(0x03, &BASIC_INFO), 0).unwrap();
        state.apply(&frame(0x05, b"pack"), 0).unwrap();
        assert_eq!(state.get_production_date(), None);
        assert_eq!(state.get_software_version(), None);
        assert_eq!(state.get_fault_counts(), None);
        assert_eq!(state.get_bms_name(), None);
    }

    #[test]
    fn state_of_charge_is_not_clamped() {
        let mut payload = BASIC_INFO;
        payload[19] = 120;
        let mut state = DeviceState::new(&Config::default());
        state.apply(&frame(0x03, &payload), 0).unwrap();
        assert_eq!(state.get_state_of_charge(), 120);
    }

    #[test]
    fn decodes_cell_voltages_for_reported_cells() {
        let mut state = DeviceState::new(&Config::default());
        state.apply(&frame(0x03, &BASIC_INFO), 0).unwrap();
        let payload = [0x0c, 0xe4, 0x0c, 0xf8, 0x0d, 0x02, 0x0c, 0xda];
        state.apply(&frame(0x04, &payload), 77).unwrap();

        assert_close(state.get_cell_voltage(0), 3.300);
        assert_close(state.get_cell_voltage(1), 3.320);
        assert_close(state.get_cell_voltage(2), 3.330);
        assert_close(state.get_cell_voltage(3), 3.290);
        assert_eq!(state.get_cell_voltage(4), 0.0);
        assert_eq!(state.cell_voltages_liveness().last_accepted_ms, 77);
    }

    #[test]
    fn cell_voltages_are_bounded_by_capacity() {
        let mut info = BASIC_INFO;
        info[21] = 16;
        let mut state = DeviceState::new(&Config {
            max_cells: 2,
            ..Config::default()
        });
        state.apply(&frame(0x03, &info), 0).unwrap();
        let payload = [0x0c, 0xe4, 0x0c, 0xf8, 0x0d, 0x02];
        state.apply(&frame(0x04, &payload), 0).unwrap();
        assert_close(state.get_cell_voltage(1), 3.320);
        assert!(state.get_cell_voltage(2).is_nan());
    }

    #[test]
    fn out_of_range_indices_are_nan() {
        let state = DeviceState::new(&Config::default());
        assert!(state.get_cell_voltage(8).is_nan());
        assert!(state.get_cell_voltage(usize::MAX).is_nan());
        assert!(state.get_ntc_temperature(2).is_nan());
        assert!(!state.get_ntc_temperature(1).is_nan());
    }

    #[test]
    fn short_basic_info_leaves_state_untouched() {
        let mut state = DeviceState::new(&Config::default());
        assert!(state.apply(&frame(0x03, &BASIC_INFO[..20]), 10).is_err());
        assert_eq!(state.get_voltage(), 0.0);
        assert_eq!(state.basic_info_liveness(), Liveness::default());
    }

    #[test]
    fn name_replaces_previous_value() {
        let mut state = DeviceState::new(&all_options());
        assert_eq!(state.get_bms_name(), Some(""));
        state.apply(&frame(0x05, b"first"), 0).unwrap();
        state.apply(&frame(0x05, b"2nd"), 0).unwrap();
        assert_eq!(state.get_bms_name(), Some("2nd"));
        state.clear_bms_name();
        assert_eq!(state.get_bms_name(), Some(""));
    }

    #[test]
    fn unknown_register_is_ignored() {
        let mut state = DeviceState::new(&Config::default());
        state.apply(&frame(0x42, &[1, 2, 3]), 5).unwrap();
        assert_eq!(state.basic_info_liveness(), Liveness::default());
        assert_eq!(state.cell_voltages_liveness(), Liveness::default());
    }

    #[test]
    fn fault_counter_counts_rising_edges_between_frames() {
        let mut state = DeviceState::new(&Config::default());
        let mut clear = BASIC_INFO;
        clear[17] = 0x00;
        for payload in [BASIC_INFO, clear, BASIC_INFO] {
            state.apply(&frame(0x03, &payload), 0).unwrap();
        }
        let counts = state.get_fault_counts().unwrap();
        assert_eq!(counts.get(ProtectionFlag::WholePackOvervoltage), 2);
        assert_eq!(counts.get(ProtectionFlag::WholePackUndervoltage), 0);

        state.clear_fault_counts();
        assert_eq!(
            state
                .get_fault_counts()
                .unwrap()
                .get(ProtectionFlag::WholePackOvervoltage),
            0
        );
    }
}
