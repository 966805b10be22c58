//! Receive framer: rebuilds frames from the raw byte stream of the BMS.
//!
//! The framer is resumable, bytes may arrive in arbitrary pieces. Any protocol
//! violation is counted and the framer falls back to waiting for the next
//! start byte, so a noisy line never stalls reception.

use crate::protocol::{self, Frame, START_BYTE, STOP_BYTE};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    WaitStart,
    WaitCommand,
    WaitStatus,
    WaitLength,
    WaitData,
    WaitChecksumHigh,
    WaitChecksumLow,
    WaitStop,
}

#[derive(Debug)]
pub struct Framer {
    state: State,
    command: u8,
    status: u8,
    length: u8,
    received: usize,
    payload: Vec<u8>,
    capacity: usize,
    checksum: u16,
    errors: u32,
}

impl Framer {
    pub fn new(max_payload_len: usize) -> Self {
        Self {
            state: State::WaitStart,
            command: 0,
            status: 0,
            length: 0,
            received: 0,
            payload: Vec::with_capacity(max_payload_len),
            capacity: max_payload_len,
            checksum: 0,
            errors: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Number of rejected bytes and frames since construction.
    pub fn errors(&self) -> u32 {
        self.errors
    }

    /// Drops any partially received frame.
    pub fn reset(&mut self) {
        self.state = State::WaitStart;
        self.clear_frame();
    }

    fn clear_frame(&mut self) {
        self.command = 0;
        self.status = 0;
        self.length = 0;
        self.received = 0;
        self.payload.clear();
        self.checksum = 0;
    }

    fn error(&mut self, err: Error) {
        log::warn!("Discarding frame: {err}");
        self.errors = self.errors.saturating_add(1);
    }

    fn overflowed(&self) -> bool {
        usize::from(self.length) > self.capacity
    }

    /// Feeds every byte of `bytes` and returns the frames completed on the way.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        bytes.iter().filter_map(|b| self.push(*b)).collect()
    }

    /// Advances the state machine by one byte.
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        log::trace!("[{:?}] 0x{:02X}", self.state, byte);
        match self.state {
            State::WaitStart => {
                if byte == START_BYTE {
                    self.clear_frame();
                    self.state = State::WaitCommand;
                } else {
                    log::trace!("Framing error, expected start byte got 0x{byte:02X}");
                    self.errors = self.errors.saturating_add(1);
                }
            }
            State::WaitCommand => {
                self.command = byte;
                self.state = State::WaitStatus;
            }
            State::WaitStatus => {
                self.status = byte;
                self.state = State::WaitLength;
            }
            State::WaitLength => {
                self.length = byte;
                if self.overflowed() {
                    self.error(Error::LengthError {
                        length: byte,
                        capacity: self.capacity,
                    });
                }
                self.state = if byte == 0 {
                    State::WaitChecksumHigh
                } else {
                    State::WaitData
                };
            }
            State::WaitData => {
                if self.received < self.capacity {
                    self.payload.push(byte);
                }
                self.received += 1;
                if self.received >= usize::from(self.length) {
                    self.state = State::WaitChecksumHigh;
                }
            }
            State::WaitChecksumHigh => {
                self.checksum = u16::from(byte) << 8;
                self.state = State::WaitChecksumLow;
            }
            State::WaitChecksumLow => {
                self.checksum |= u16::from(byte);
                self.state = State::WaitStop;
            }
            State::WaitStop => {
                self.state = State::WaitStart;
                return self.finish(byte);
            }
        }
        None
    }

    fn finish(&mut self, stop: u8) -> Option<Frame> {
        if self.overflowed() {
            // already counted when the length arrived
            log::debug!(
                "Dropping overflowed frame for register 0x{:02X}",
                self.command
            );
            return None;
        }
        if let Err(err) = protocol::verify(self.status, &self.payload, self.checksum) {
            self.error(err);
            return None;
        }
        if stop != STOP_BYTE {
            self.error(Error::StopByteError(stop));
            return None;
        }
        let frame = Frame {
            command: self.command,
            status: self.status,
            payload: std::mem::take(&mut self.payload),
        };
        self.payload.reserve(self.capacity);
        log::debug!("Received {frame:?}");
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{checksum, STATUS_ERROR, STATUS_OK};

    fn reply(command: u8, status: u8, payload: &[u8]) -> Vec<u8> {
        let mut body = vec![status, payload.len() as u8];
        body.extend_from_slice(payload);
        let ck = checksum(&body);
        let mut frame = vec![START_BYTE, command];
        frame.extend_from_slice(&body);
        frame.extend_from_slice(&ck.to_be_bytes());
        frame.push(STOP_BYTE);
        frame
    }

    #[test]
    fn decodes_a_complete_frame() {
        let mut framer = Framer::new(64);
        let frames = framer.feed(&reply(0x04, STATUS_OK, &[0x0c, 0xe4]));
        assert_eq!(
            frames,
            vec![Frame {
                command: 0x04,
                status: STATUS_OK,
                payload: vec![0x0c, 0xe4]
            }]
        );
        assert_eq!(framer.errors(), 0);
        assert_eq!(framer.state(), State::WaitStart);
    }

    #[test]
    fn zero_length_frame_does_not_consume_checksum_as_data() {
        let mut framer = Framer::new(64);
        let bytes = reply(0x42, STATUS_OK, &[]);
        assert_eq!(bytes.len(), 7);
        let frames = framer.feed(&bytes);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload.is_empty());
        assert_eq!(framer.errors(), 0);
    }

    #[test]
    fn result_is_independent_of_chunking() {
        let mut stream = vec![0x00, 0x13];
        stream.extend(reply(0x03, STATUS_OK, &[1, 2, 3, 4, 5]));
        stream.extend([0xdd, 0x03]); // truncated garbage start
        stream.extend(reply(0x04, STATUS_ERROR, &[9, 9]));
        stream.extend(reply(0x04, STATUS_OK, &[0x0c, 0xe4, 0x0c, 0xf8]));
        stream.extend(reply(0x05, STATUS_OK, b"name"));

        let mut whole = Framer::new(64);
        let expected = whole.feed(&stream);

        for chunk_size in 1..stream.len() {
            let mut framer = Framer::new(64);
            let frames: Vec<Frame> = stream
                .chunks(chunk_size)
                .flat_map(|chunk| framer.feed(chunk))
                .collect();
            assert_eq!(frames, expected, "chunk size {chunk_size}");
            assert_eq!(framer.errors(), whole.errors(), "chunk size {chunk_size}");
            assert_eq!(framer.state(), whole.state(), "chunk size {chunk_size}");
        }
    }

    #[test]
    fn stray_bytes_before_start_are_counted_and_skipped() {
        let mut framer = Framer::new(64);
        let mut stream = vec![0x00];
        stream.extend(reply(0x03, STATUS_OK, &[0xaa]));
        let frames = framer.feed(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(framer.errors(), 1);
    }

    #[test]
    fn corrupted_payload_is_rejected_once() {
        let mut bytes = reply(0x04, STATUS_OK, &[0x0c, 0xe4, 0x0c, 0xf8]);
        for index in 4..8 {
            let mut corrupted = bytes.clone();
            corrupted[index] ^= 0x01;
            let mut framer = Framer::new(64);
            assert!(framer.feed(&corrupted).is_empty());
            assert_eq!(framer.errors(), 1);
        }
        // the framer keeps working afterwards
        bytes.extend(reply(0x04, STATUS_OK, &[]));
        let mut framer = Framer::new(64);
        assert_eq!(framer.feed(&bytes).len(), 2);
    }

    #[test]
    fn error_status_is_rejected() {
        let mut framer = Framer::new(64);
        assert!(framer.feed(&reply(0x03, STATUS_ERROR, &[])).is_empty());
        assert_eq!(framer.errors(), 1);
    }

    #[test]
    fn wrong_stop_byte_is_rejected() {
        let mut bytes = reply(0x03, STATUS_OK, &[1]);
        *bytes.last_mut().unwrap() = 0x78;
        let mut framer = Framer::new(64);
        assert!(framer.feed(&bytes).is_empty());
        assert_eq!(framer.errors(), 1);
        assert_eq!(framer.state(), State::WaitStart);
    }

    #[test]
    fn overflowing_frame_is_discarded_without_overrun() {
        let mut framer = Framer::new(4);
        let mut stream = reply(0x04, STATUS_OK, &[1, 2, 3, 4, 5, 6]);
        stream.extend(reply(0x04, STATUS_OK, &[1, 2]));
        let frames = framer.feed(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, vec![1, 2]);
        assert_eq!(framer.errors(), 1);
    }

    #[test]
    fn resumes_across_invocations() {
        let bytes = reply(0x03, STATUS_OK, &[7, 8, 9]);
        let mut framer = Framer::new(64);
        assert!(framer.feed(&bytes[..5]).is_empty());
        assert_eq!(framer.state(), State::WaitData);
        assert!(framer.feed(&[]).is_empty());
        assert_eq!(framer.feed(&bytes[5..]).len(), 1);
    }

    #[test]
    fn reset_drops_partial_frame() {
        let bytes = reply(0x03, STATUS_OK, &[7, 8, 9]);
        let mut framer = Framer::new(64);
        framer.feed(&bytes[..5]);
        framer.reset();
        assert_eq!(framer.state(), State::WaitStart);
        assert_eq!(framer.feed(&bytes).len(), 1);
    }
}
