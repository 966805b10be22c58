use crate::transport::Transport;
use std::io::{self, Read, Write};
use std::time::Duration;

/// [`Transport`] over a local serial port, 9600 baud 8N1 as used by JBD boards.
pub struct SerialTransport {
    serial: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    pub fn open(port: &str, timeout: Duration) -> crate::Result<Self> {
        let serial = serialport::new(port, 9600)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(io::Error::from)?;
        log::debug!("Opened serial port '{port}'");
        Ok(Self { serial })
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port", &self.serial.name())
            .finish()
    }
}

impl Transport for SerialTransport {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        let pending = self.serial.bytes_to_read().map_err(io::Error::from)?;
        Ok(pending as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let received = self.serial.read(buf)?;
        log::trace!("receive_bytes: {:02X?}", &buf[..received]);
        Ok(received)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        log::trace!("write bytes: {buf:02X?}");
        self.serial.write_all(buf)
    }
}
