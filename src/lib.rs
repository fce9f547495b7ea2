// lib.rs

mod client;
mod core;
mod modbus_rtu;
mod receiver;
mod transport;

pub use crate::core::{ExceptionCode, FunctionCode, RtuResult, status_code};
pub use crate::core::{BROADCAST_ADDRESS, EXCEPTION_FLAG, MAX_READ_BITS, MAX_READ_REGISTERS, MAX_SLAVE_ADDRESS, STATUS_OK};
pub use client::{DEFAULT_TIMEOUT, RegisterClient, RegisterClientBuilder};
pub use modbus_rtu::{MAX_RTU_FRAME_SIZE, Response, build_frame, crc16, format_hex_packet};
pub use receiver::{FrameReceiver, POLL_INTERVAL, Progress, ReceiverState};
pub use transport::{Parity, SerialConfig, SerialPortTransport, SerialTransport};

use std::time::Duration;

/// Why a receive attempt produced no trustworthy frame.
#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("No response progress for {elapsed:?}")]
    TimedOut { elapsed: Duration },

    #[error("CRC mismatch: expected {expected:#06x}, received {received:#06x}")]
    CrcMismatch { expected: u16, received: u16 },

    #[error("Serial I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ReceiveError> for ExceptionCode {
    fn from(_: ReceiveError) -> Self {
        ExceptionCode::ReceiveTimeout
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Serial transport not set")]
    TransportMissing,

    #[error("Timeout must be greater than zero")]
    ZeroTimeout,

    #[error("Invalid data bits: {0}, expected 5..=8")]
    InvalidDataBits(u8),

    #[error("Invalid stop bits: {0}, expected 1 or 2")]
    InvalidStopBits(u8),

    #[error("Failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
}
