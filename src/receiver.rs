use std::time::Duration;

use crate::ReceiveError;
use crate::core::{EXCEPTION_FLAG, FunctionCode};
use crate::modbus_rtu::{Response, crc16, format_hex_packet};
use crate::transport::SerialTransport;

/// Idle time between availability checks while the line is silent.
pub const POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Address, function and the next two bytes; enough to know the frame length.
const HEADER_LEN: usize = 4;

/// Address, function|0x80, exception code, CRC.
const EXCEPTION_FRAME_LEN: usize = 5;

/// Address, function, register address, value/quantity, CRC.
const WRITE_ECHO_FRAME_LEN: usize = 8;

/// Address, function, byte count and CRC around a read reply body.
const READ_FRAME_OVERHEAD: usize = 5;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReceiverState {
    /// Collecting header byte `index` (0..4).
    AwaitHeader { index: usize },
    /// Header accepted, `remaining` bytes of body and CRC still to come.
    AwaitBody { remaining: usize },
    Complete,
    CrcMismatch,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Progress {
    Pending,
    Complete(Response),
    CrcMismatch { expected: u16, received: u16 },
}

/// Reassembles one reply frame from a byte stream.
///
/// `expected` depends on the function: the reply byte count for reads, the
/// echoed register address for writes. A header that names the right slave
/// and function but disagrees with `expected` is treated as a stale frame:
/// its address byte is discarded and the search for the address byte starts
/// over from the byte after it.
///
/// Terminal states absorb any further bytes.
#[derive(Debug)]
pub struct FrameReceiver {
    slave: u8,
    function: FunctionCode,
    expected: u16,
    timeout: Duration,
    state: ReceiverState,
    buffer: Vec<u8>,
}

impl FrameReceiver {
    pub fn new(slave: u8, function: FunctionCode, expected: u16, timeout: Duration) -> Self {
        FrameReceiver {
            slave,
            function,
            expected,
            timeout,
            state: ReceiverState::AwaitHeader { index: 0 },
            buffer: Vec::with_capacity(HEADER_LEN),
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Feeds one received byte.
    pub fn push(&mut self, byte: u8) -> Progress {
        match self.state {
            ReceiverState::AwaitHeader { index } => self.push_header(index, byte),
            ReceiverState::AwaitBody { remaining } => self.push_body(remaining, byte),
            ReceiverState::Complete | ReceiverState::CrcMismatch => {
                log::trace!("Ignoring byte {byte:#04x} after terminal state {:?}", self.state);
                Progress::Pending
            }
        }
    }

    /// Polls `transport` until a frame completes, fails its CRC, or the line
    /// stays silent for longer than the timeout.
    ///
    /// The timeout restarts on every received byte. One attempt only; the
    /// receiver is consumed.
    pub fn receive<T: SerialTransport + ?Sized>(
        mut self,
        transport: &mut T,
    ) -> Result<Response, ReceiveError> {
        let mut last_progress = transport.now();
        let mut byte = [0u8; 1];

        loop {
            if transport.bytes_available()? > 0 && transport.read(&mut byte)? == 1 {
                last_progress = transport.now();
                match self.push(byte[0]) {
                    Progress::Pending => continue,
                    Progress::Complete(response) => return Ok(response),
                    Progress::CrcMismatch { expected, received } => {
                        return Err(ReceiveError::CrcMismatch { expected, received });
                    }
                }
            }

            let elapsed = transport.now().duration_since(last_progress);
            if elapsed > self.timeout {
                log::debug!(
                    "Receive timed out in {:?} waiting for slave {} function {:#04x}",
                    self.state,
                    self.slave,
                    self.function.code()
                );
                return Err(ReceiveError::TimedOut { elapsed });
            }
            transport.pause(POLL_INTERVAL);
        }
    }

    fn push_header(&mut self, index: usize, byte: u8) -> Progress {
        match index {
            0 if byte != self.slave => {
                log::trace!("Dropping byte {byte:#04x} while seeking slave {}", self.slave);
                return Progress::Pending;
            }
            1 if byte & !EXCEPTION_FLAG != self.function.code() => {
                log::trace!(
                    "Function byte {byte:#04x} does not match {:#04x}, resynchronizing",
                    self.function.code()
                );
                self.buffer.clear();
                self.state = ReceiverState::AwaitHeader { index: 0 };
                // the rejected byte may itself be the start of the reply
                return self.push_header(0, byte);
            }
            _ => {}
        }

        self.buffer.push(byte);
        if index + 1 < HEADER_LEN {
            self.state = ReceiverState::AwaitHeader { index: index + 1 };
            return Progress::Pending;
        }
        self.decide_length()
    }

    fn decide_length(&mut self) -> Progress {
        let total = if self.buffer[1] & EXCEPTION_FLAG != 0 {
            EXCEPTION_FRAME_LEN
        } else if self.function.is_read() {
            let byte_count = self.buffer[2];
            if byte_count as u16 != self.expected {
                log::debug!(
                    "Byte count {byte_count} does not match expected {}, resynchronizing",
                    self.expected
                );
                return self.resync();
            }
            READ_FRAME_OVERHEAD + byte_count as usize
        } else {
            let echoed = ((self.buffer[2] as u16) << 8) | (self.buffer[3] as u16);
            if echoed != self.expected {
                log::debug!(
                    "Echoed address {echoed:#06x} does not match {:#06x}, resynchronizing",
                    self.expected
                );
                return self.resync();
            }
            WRITE_ECHO_FRAME_LEN
        };

        self.buffer.reserve(total - HEADER_LEN);
        self.state = ReceiverState::AwaitBody { remaining: total - HEADER_LEN };
        Progress::Pending
    }

    /// Drops only the address byte; the other three header bytes are scanned
    /// again since the real reply may start among them.
    fn resync(&mut self) -> Progress {
        let rest = self.buffer.split_off(1);
        self.buffer.clear();
        self.state = ReceiverState::AwaitHeader { index: 0 };

        // three bytes never complete a header, so this cannot recurse into decide_length
        for byte in rest {
            if let ReceiverState::AwaitHeader { index } = self.state {
                self.push_header(index, byte);
            }
        }
        Progress::Pending
    }

    fn push_body(&mut self, remaining: usize, byte: u8) -> Progress {
        self.buffer.push(byte);
        let remaining = remaining - 1;
        if remaining > 0 {
            self.state = ReceiverState::AwaitBody { remaining };
            return Progress::Pending;
        }
        self.finish()
    }

    fn finish(&mut self) -> Progress {
        let split = self.buffer.len() - 2;
        let expected = crc16(&self.buffer[..split]);
        let received = ((self.buffer[split] as u16) << 8) | (self.buffer[split + 1] as u16);

        if expected != received {
            log::warn!(
                "CRC mismatch from slave {}: expected {expected:#06x}, received {received:#06x} in [{}]",
                self.slave,
                format_hex_packet(&self.buffer)
            );
            self.state = ReceiverState::CrcMismatch;
            return Progress::CrcMismatch { expected, received };
        }

        log::debug!("RX slave:{} {}", self.slave, format_hex_packet(&self.buffer));
        self.state = ReceiverState::Complete;
        Progress::Complete(Response::new(std::mem::take(&mut self.buffer)))
    }
}
