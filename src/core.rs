use thiserror::Error;

/// Address every slave listens to; slaves never answer it.
pub const BROADCAST_ADDRESS: u8 = 0x00;

/// Highest valid unicast slave address.
pub const MAX_SLAVE_ADDRESS: u8 = 0xF7;

/// Bit set in the function byte of an exception reply.
pub const EXCEPTION_FLAG: u8 = 0x80;

pub const MAX_READ_BITS: u16 = 2000;
pub const MAX_READ_REGISTERS: u16 = 125;

/// Status byte reported for a successful exchange.
pub const STATUS_OK: u8 = 0x00;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscrete = 0x02,
    ReadHolding = 0x03,
    ReadInput = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleHolding = 0x06,
    WriteMultiCoils = 0x0F,
    WriteMultiHolding = 0x10,
}

impl FunctionCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Reads answer with a byte count followed by a variable body.
    pub fn is_read(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscrete
                | FunctionCode::ReadHolding
                | FunctionCode::ReadInput
        )
    }

    /// Writes answer with a fixed-size echo of the register address.
    pub fn is_write(self) -> bool {
        !self.is_read()
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = ExceptionCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x01 => Ok(FunctionCode::ReadCoils),
            0x02 => Ok(FunctionCode::ReadDiscrete),
            0x03 => Ok(FunctionCode::ReadHolding),
            0x04 => Ok(FunctionCode::ReadInput),
            0x05 => Ok(FunctionCode::WriteSingleCoil),
            0x06 => Ok(FunctionCode::WriteSingleHolding),
            0x0F => Ok(FunctionCode::WriteMultiCoils),
            0x10 => Ok(FunctionCode::WriteMultiHolding),
            _ => Err(ExceptionCode::IllegalFunction),
        }
    }
}

/// Status of a register operation.
///
/// The first four variants are decoded from exception replies; the rest are
/// raised locally and never appear on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
pub enum ExceptionCode {
    #[error("Illegal function")]
    IllegalFunction,

    #[error("Illegal data address")]
    IllegalDataAddress,

    #[error("Illegal data value")]
    IllegalDataValue,

    #[error("Slave device failure")]
    SlaveFailure,

    #[error("CRC check failed")]
    CrcError,

    #[error("No valid response received before timeout")]
    ReceiveTimeout,

    #[error("Frame exceeds the RTU size limit")]
    MemoryError,

    #[error("Device address out of range for this operation")]
    AddressError,

    #[error("Unrecognized exception code {0:#04x}")]
    Unrecognized(u8),
}

impl ExceptionCode {
    pub fn code(self) -> u8 {
        match self {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::SlaveFailure => 0x04,
            ExceptionCode::CrcError => 0x08,
            ExceptionCode::ReceiveTimeout => 0x09,
            ExceptionCode::MemoryError => 0x0A,
            ExceptionCode::AddressError => 0x0B,
            ExceptionCode::Unrecognized(code) => code,
        }
    }

    /// Returns `None` for [`STATUS_OK`].
    pub fn from_code(code: u8) -> Option<Self> {
        let exception = match code {
            STATUS_OK => return None,
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            0x04 => ExceptionCode::SlaveFailure,
            0x08 => ExceptionCode::CrcError,
            0x09 => ExceptionCode::ReceiveTimeout,
            0x0A => ExceptionCode::MemoryError,
            0x0B => ExceptionCode::AddressError,
            other => ExceptionCode::Unrecognized(other),
        };
        Some(exception)
    }

    /// Decodes the code byte of an exception reply.
    ///
    /// Codes 8..=11 belong to this master's local statuses, so a slave sending
    /// them gets [`ExceptionCode::Unrecognized`] like any other nonstandard code.
    pub fn from_wire(code: u8) -> Self {
        match code {
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            0x04 => ExceptionCode::SlaveFailure,
            other => ExceptionCode::Unrecognized(other),
        }
    }

    /// True when no trustworthy reply arrived at all.
    pub fn is_recv_error(self) -> bool {
        matches!(self, ExceptionCode::CrcError | ExceptionCode::ReceiveTimeout)
    }
}

pub type RtuResult<T> = Result<T, ExceptionCode>;

/// Numeric status of an operation: 0 on success, the exception code otherwise.
pub fn status_code<T>(result: &RtuResult<T>) -> u8 {
    match result {
        Ok(_) => STATUS_OK,
        Err(exception) => exception.code(),
    }
}

/// Reads need a real slave to answer.
pub fn check_read_address(address: u8) -> RtuResult<()> {
    if address == BROADCAST_ADDRESS || address > MAX_SLAVE_ADDRESS {
        log::debug!("Device address {address} rejected for read");
        return Err(ExceptionCode::AddressError);
    }
    Ok(())
}

pub fn check_write_address(address: u8) -> RtuResult<()> {
    if address > MAX_SLAVE_ADDRESS {
        log::debug!("Device address {address} rejected for write");
        return Err(ExceptionCode::AddressError);
    }
    Ok(())
}

/// Register address followed by a 16-bit field, both big-endian.
pub fn address_value_payload(register: u16, value: u16) -> Vec<u8> {
    let mut msg: [u8; 4] = [0; 4];
    msg[0] = (register >> 8) as u8;
    msg[1] = register as u8;
    msg[2] = (value >> 8) as u8;
    msg[3] = value as u8;
    Vec::from(msg)
}

pub fn coil_value(on: bool) -> u16 {
    if on { 0xFF00 } else { 0x0000 }
}

/// Bytes needed to carry `count` packed bits.
pub fn packed_len(count: usize) -> usize {
    count.div_ceil(8)
}

pub fn write_multi_coils_payload(register: u16, coils: &[bool]) -> Vec<u8> {
    let byte_count = packed_len(coils.len());
    let mut result: Vec<u8> = Vec::with_capacity(5 + byte_count);
    result.push((register >> 8) as u8);
    result.push(register as u8);
    result.push((coils.len() >> 8) as u8);
    result.push(coils.len() as u8);
    result.push(byte_count as u8);

    // LSB of the first data byte is the first coil
    let mut bytes = vec![0u8; byte_count];
    for (i, &bit) in coils.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    result.extend(bytes);
    result
}

pub fn write_multi_holding_payload(register: u16, values: &[u16]) -> Vec<u8> {
    let mut result: Vec<u8> = Vec::with_capacity(5 + values.len() * 2);
    result.push((register >> 8) as u8);
    result.push(register as u8);
    result.push((values.len() >> 8) as u8);
    result.push(values.len() as u8);
    result.push((values.len() * 2) as u8);

    for value in values {
        result.push((value >> 8) as u8);
        result.push(*value as u8);
    }
    result
}

/// Unpacks `count` bits from a coil/discrete reply body.
pub fn unpack_bits(data: &[u8], count: usize) -> Vec<bool> {
    let mut result = Vec::with_capacity(count);
    for i in 0..count {
        let byte_idx = i / 8;
        let bit_idx = i % 8;
        let bit = data.get(byte_idx).is_some_and(|byte| (byte >> bit_idx) & 0x01 != 0);
        result.push(bit);
    }
    result
}

/// Decodes big-endian register values from a register reply body.
pub fn unpack_registers(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|pair| ((pair[0] as u16) << 8) | (pair[1] as u16))
        .collect()
}
