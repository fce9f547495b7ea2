use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serialport::SerialPort;

use crate::SetupError;

/// Raw byte I/O plus the clock the receiver measures timeouts against.
///
/// `now` and `pause` default to the system monotonic clock; test transports
/// override them to run on virtual time.
pub trait SerialTransport {
    /// Queues `bytes` for transmission, blocking until they are accepted.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Reads up to `buf.len()` already-received bytes without blocking.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn pause(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }

    /// Discards whatever is waiting in the inbound buffer.
    fn clear_input(&mut self) -> io::Result<()> {
        let mut scratch = [0u8; 64];
        loop {
            let available = self.bytes_available()?;
            if available == 0 {
                return Ok(());
            }
            let want = available.min(scratch.len());
            if self.read(&mut scratch[..want])? == 0 {
                return Ok(());
            }
        }
    }
}

impl<T: SerialTransport + ?Sized> SerialTransport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write(bytes)
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        (**self).bytes_available()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn now(&self) -> Instant {
        (**self).now()
    }

    fn pause(&mut self, duration: Duration) {
        (**self).pause(duration)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        (**self).clear_input()
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Serial line settings. Missing fields fall back to 9600 8N1, 100 ms.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    /// Rolling receive timeout, also used as the post-transmit quiet interval.
    pub timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            port: String::from("/dev/ttyAMA0"),
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            timeout_ms: 100,
        }
    }
}

impl SerialConfig {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        SerialConfig {
            port: port.into(),
            baud_rate,
            ..SerialConfig::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn data_bits(&self) -> Result<serialport::DataBits, SetupError> {
        match self.data_bits {
            5 => Ok(serialport::DataBits::Five),
            6 => Ok(serialport::DataBits::Six),
            7 => Ok(serialport::DataBits::Seven),
            8 => Ok(serialport::DataBits::Eight),
            other => Err(SetupError::InvalidDataBits(other)),
        }
    }

    fn stop_bits(&self) -> Result<serialport::StopBits, SetupError> {
        match self.stop_bits {
            1 => Ok(serialport::StopBits::One),
            2 => Ok(serialport::StopBits::Two),
            other => Err(SetupError::InvalidStopBits(other)),
        }
    }
}

/// [`SerialTransport`] over a real serial device.
pub struct SerialPortTransport {
    port: Box<dyn SerialPort>,
}

impl SerialPortTransport {
    pub fn open(config: &SerialConfig) -> Result<Self, SetupError> {
        let data_bits = config.data_bits()?;
        let stop_bits = config.stop_bits()?;

        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(data_bits)
            .parity(config.parity.into())
            .stop_bits(stop_bits)
            .timeout(config.timeout())
            .open()
            .map_err(|source| SetupError::Open {
                port: config.port.clone(),
                source,
            })?;

        log::debug!(
            "Opened {} at {} baud, {}{}{}",
            config.port,
            config.baud_rate,
            config.data_bits,
            match config.parity {
                Parity::None => 'N',
                Parity::Odd => 'O',
                Parity::Even => 'E',
            },
            config.stop_bits
        );
        Ok(SerialPortTransport { port })
    }
}

impl SerialTransport for SerialPortTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        Write::write_all(&mut self.port, bytes)?;
        Write::flush(&mut self.port)
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut self.port, buf)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }
}
