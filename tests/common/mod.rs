#![allow(dead_code)]

use jbdbms_lib::protocol::{checksum, START_BYTE, STATUS_OK, STOP_BYTE};
use jbdbms_lib::transport::{Clock, Transport};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::Duration;

#[derive(Default)]
struct Line {
    rx: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    // register -> reply queued whenever a request for it is written
    replies: HashMap<u8, Vec<u8>>,
}

/// In-memory transport; clones share the same line.
#[derive(Clone, Default)]
pub struct MockTransport {
    line: Rc<RefCell<Line>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&self, bytes: &[u8]) {
        self.line.borrow_mut().rx.extend(bytes);
    }

    pub fn reply_to(&self, register: u8, reply: Vec<u8>) {
        self.line.borrow_mut().replies.insert(register, reply);
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.line.borrow().written.clone()
    }

    pub fn pending(&self) -> usize {
        self.line.borrow().rx.len()
    }
}

impl Transport for MockTransport {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        Ok(self.line.borrow().rx.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut line = self.line.borrow_mut();
        let n = buf.len().min(line.rx.len());
        for (slot, byte) in buf.iter_mut().zip(line.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut line = self.line.borrow_mut();
        line.written.push(buf.to_vec());
        if let Some(reply) = buf.get(2).and_then(|cmd| line.replies.get(cmd)).cloned() {
            line.rx.extend(reply);
        }
        Ok(())
    }
}

/// Clock that only moves when told to, or when the driver sleeps.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration.as_millis() as u64);
    }
}

/// Builds a reply frame as the BMS would send it.
pub fn reply(command: u8, status: u8, payload: &[u8]) -> Vec<u8> {
    let mut body = vec![status, payload.len() as u8];
    body.extend_from_slice(payload);
    let ck = checksum(&body);
    let mut frame = vec![START_BYTE, command];
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&ck.to_be_bytes());
    frame.push(STOP_BYTE);
    frame
}

pub fn ok_reply(command: u8, payload: &[u8]) -> Vec<u8> {
    reply(command, STATUS_OK, payload)
}

pub const BASIC_INFO: [u8; 27] = [
    0x0a, 0x28, // 26.00 V
    0x01, 0xf4, // 5.00 A charging
    0x13, 0x88, // 50.00 Ah
    0x27, 0x10, // 100.00 Ah
    0x00, 0x07, // 7 cycles
    0x2a, 0x6f, // 2021-03-15
    0x00, 0x02, // cell 1 balancing
    0x00, 0x00,
    0x00, 0x00, // no protection
    0x10, // version 1.0
    0x63, // 99 %
    0x01, // charge FET on
    0x04, // 4 cells
    0x02, // 2 NTCs
    0x0b, 0x9b, // 2971 dK
    0x0b, 0x91, // 2961 dK
];

pub const CELL_VOLTAGES: [u8; 8] = [0x0c, 0xe4, 0x0c, 0xf8, 0x0d, 0x02, 0x0c, 0xda];

pub fn assert_close(actual: f32, expected: f32) {
    assert!(
        (actual - expected).abs() < 1e-3,
        "expected {expected}, got {actual}"
    );
}
