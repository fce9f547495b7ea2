use std::time::Duration;

use crate::SetupError;
use crate::core::*;
use crate::modbus_rtu::{MAX_RTU_FRAME_SIZE, Response, build_frame, format_hex_packet};
use crate::receiver::FrameReceiver;
use crate::transport::{SerialConfig, SerialPortTransport, SerialTransport};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

pub struct RegisterClientBuilder<T> {
    transport: Option<T>,
    timeout: Duration,
}

impl<T: SerialTransport> RegisterClientBuilder<T> {
    pub fn transport(mut self, transport: T) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout_ms(self, timeout_ms: u64) -> Self {
        self.timeout(Duration::from_millis(timeout_ms))
    }

    pub fn build(self) -> Result<RegisterClient<T>, SetupError> {
        let transport = self.transport.ok_or(SetupError::TransportMissing)?;
        if self.timeout.is_zero() {
            return Err(SetupError::ZeroTimeout);
        }
        Ok(RegisterClient {
            transport,
            timeout: self.timeout,
        })
    }
}

/// Modbus RTU master bound to one serial line.
///
/// Every operation is a single blocking request/response exchange. Address
/// and quantity problems are reported before anything is transmitted; there
/// is no retry, so callers loop themselves when they need one.
///
/// Reads require a unicast slave (1..=247). Writes also accept the broadcast
/// address 0: the request is sent, the quiet interval elapses, and the write
/// reports success without waiting for a reply no slave will send.
pub struct RegisterClient<T> {
    transport: T,
    timeout: Duration,
}

impl<T: SerialTransport> RegisterClient<T> {
    pub fn builder() -> RegisterClientBuilder<T> {
        RegisterClientBuilder {
            transport: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn new(transport: T) -> Self {
        RegisterClient {
            transport,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Rolling receive timeout, also waited out after each transmission.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn read_coil(&mut self, address: u8, register: u16) -> RtuResult<bool> {
        let data = self.read_bits(FunctionCode::ReadCoils, address, register, 1)?;
        Ok(data.first().is_some_and(|byte| byte & 0x01 != 0))
    }

    pub fn read_discrete_input(&mut self, address: u8, register: u16) -> RtuResult<bool> {
        let data = self.read_bits(FunctionCode::ReadDiscrete, address, register, 1)?;
        Ok(data.first().is_some_and(|byte| byte & 0x01 != 0))
    }

    pub fn read_holding_register(&mut self, address: u8, register: u16) -> RtuResult<u16> {
        let values = self.read_registers(FunctionCode::ReadHolding, address, register, 1)?;
        values.first().copied().ok_or(ExceptionCode::MemoryError)
    }

    pub fn read_input_register(&mut self, address: u8, register: u16) -> RtuResult<u16> {
        let values = self.read_registers(FunctionCode::ReadInput, address, register, 1)?;
        values.first().copied().ok_or(ExceptionCode::MemoryError)
    }

    pub fn write_coil(&mut self, address: u8, register: u16, on: bool) -> RtuResult<()> {
        check_write_address(address)?;
        let payload = address_value_payload(register, coil_value(on));
        self.command(address, FunctionCode::WriteSingleCoil, &payload, register)
    }

    pub fn write_holding_register(&mut self, address: u8, register: u16, value: u16) -> RtuResult<()> {
        check_write_address(address)?;
        let payload = address_value_payload(register, value);
        self.command(address, FunctionCode::WriteSingleHolding, &payload, register)
    }

    /// Reads `count` coils starting at `register`, one entry per coil.
    pub fn read_coils(&mut self, address: u8, register: u16, count: u16) -> RtuResult<Vec<bool>> {
        let data = self.read_bits(FunctionCode::ReadCoils, address, register, count)?;
        Ok(unpack_bits(&data, count as usize))
    }

    /// Like [`read_coils`](Self::read_coils) but returns the packed reply bytes.
    pub fn read_coil_bytes(&mut self, address: u8, register: u16, count: u16) -> RtuResult<Vec<u8>> {
        self.read_bits(FunctionCode::ReadCoils, address, register, count)
    }

    pub fn read_discrete_inputs(&mut self, address: u8, register: u16, count: u16) -> RtuResult<Vec<bool>> {
        let data = self.read_bits(FunctionCode::ReadDiscrete, address, register, count)?;
        Ok(unpack_bits(&data, count as usize))
    }

    pub fn read_discrete_input_bytes(&mut self, address: u8, register: u16, count: u16) -> RtuResult<Vec<u8>> {
        self.read_bits(FunctionCode::ReadDiscrete, address, register, count)
    }

    pub fn read_holding_registers(&mut self, address: u8, register: u16, count: u16) -> RtuResult<Vec<u16>> {
        self.read_registers(FunctionCode::ReadHolding, address, register, count)
    }

    pub fn read_input_registers(&mut self, address: u8, register: u16, count: u16) -> RtuResult<Vec<u16>> {
        self.read_registers(FunctionCode::ReadInput, address, register, count)
    }

    pub fn write_coils(&mut self, address: u8, register: u16, coils: &[bool]) -> RtuResult<()> {
        check_write_address(address)?;
        if coils.is_empty() || coils.len() > u16::MAX as usize {
            return Err(ExceptionCode::IllegalDataValue);
        }
        let payload = write_multi_coils_payload(register, coils);
        self.command(address, FunctionCode::WriteMultiCoils, &payload, register)
    }

    pub fn write_holding_registers(&mut self, address: u8, register: u16, values: &[u16]) -> RtuResult<()> {
        check_write_address(address)?;
        if values.is_empty() || values.len() > u16::MAX as usize {
            return Err(ExceptionCode::IllegalDataValue);
        }
        let payload = write_multi_holding_payload(register, values);
        self.command(address, FunctionCode::WriteMultiHolding, &payload, register)
    }

    /// Returns the packed data bytes of a coil or discrete-input reply.
    fn read_bits(&mut self, function: FunctionCode, address: u8, register: u16, count: u16) -> RtuResult<Vec<u8>> {
        check_read_address(address)?;
        if count == 0 || count > MAX_READ_BITS {
            return Err(ExceptionCode::IllegalDataValue);
        }
        let byte_count = packed_len(count as usize) as u16;
        let payload = address_value_payload(register, count);
        let response = self.exchange(address, function, &payload, byte_count)?;
        Ok(read_data(&response, byte_count)?.to_vec())
    }

    fn read_registers(&mut self, function: FunctionCode, address: u8, register: u16, count: u16) -> RtuResult<Vec<u16>> {
        check_read_address(address)?;
        if count == 0 || count > MAX_READ_REGISTERS {
            return Err(ExceptionCode::IllegalDataValue);
        }
        let payload = address_value_payload(register, count);
        let response = self.exchange(address, function, &payload, count * 2)?;
        Ok(unpack_registers(read_data(&response, count * 2)?))
    }

    /// Sends a write and, unless it was broadcast, waits for the echo of `register`.
    fn command(&mut self, address: u8, function: FunctionCode, payload: &[u8], register: u16) -> RtuResult<()> {
        if address == BROADCAST_ADDRESS {
            self.transmit(address, function, payload)?;
            log::debug!("Broadcast {:#04x} sent, no reply expected", function.code());
            return Ok(());
        }
        self.exchange(address, function, payload, register).map(|_| ())
    }

    fn exchange(&mut self, address: u8, function: FunctionCode, payload: &[u8], expected: u16) -> RtuResult<Response> {
        self.transmit(address, function, payload)?;

        let receiver = FrameReceiver::new(address, function, expected, self.timeout);
        let response = receiver.receive(&mut self.transport).map_err(|err| {
            log::debug!("Slave {address} function {:#04x}: {err}", function.code());
            ExceptionCode::from(err)
        })?;

        match response.exception() {
            Some(exception) => {
                log::debug!("Slave {address} function {:#04x} raised {exception}", function.code());
                Err(exception)
            }
            None => Ok(response),
        }
    }

    fn transmit(&mut self, address: u8, function: FunctionCode, payload: &[u8]) -> RtuResult<()> {
        let frame = build_frame(address, function.code(), payload);
        if frame.len() > MAX_RTU_FRAME_SIZE {
            log::warn!("Request of {} bytes exceeds the {MAX_RTU_FRAME_SIZE}-byte frame limit", frame.len());
            return Err(ExceptionCode::MemoryError);
        }

        // a tail left over from an earlier exchange would corrupt this one
        self.transport.clear_input().map_err(|err| {
            log::warn!("Failed to clear serial input: {err}");
            ExceptionCode::ReceiveTimeout
        })?;

        log::debug!("TX slave:{address} {}", format_hex_packet(&frame));
        self.transport.write(&frame).map_err(|err| {
            log::warn!("Failed to write request to slave {address}: {err}");
            ExceptionCode::ReceiveTimeout
        })?;

        self.transport.pause(self.timeout);
        Ok(())
    }
}

/// Data bytes of a read reply, which must be exactly `byte_count` long.
fn read_data(response: &Response, byte_count: u16) -> RtuResult<&[u8]> {
    let data = response.data();
    if data.len() != byte_count as usize {
        log::debug!(
            "Slave {} returned {} data bytes, expected {byte_count}",
            response.address(),
            data.len()
        );
        return Err(ExceptionCode::ReceiveTimeout);
    }
    Ok(data)
}

impl RegisterClient<SerialPortTransport> {
    /// Opens the serial port described by `config`.
    pub fn open(config: &SerialConfig) -> Result<Self, SetupError> {
        let transport = SerialPortTransport::open(config)?;
        Self::builder()
            .transport(transport)
            .timeout(config.timeout())
            .build()
    }
}
