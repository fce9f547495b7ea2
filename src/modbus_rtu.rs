use crate::core::{EXCEPTION_FLAG, ExceptionCode, STATUS_OK};

/// Largest frame a Modbus RTU device is required to handle.
pub const MAX_RTU_FRAME_SIZE: usize = 256;

/// Address + function + CRC.
pub const FRAME_OVERHEAD: usize = 4;

/// Modbus CRC16 (polynomial 0xA001, initial 0xFFFF).
///
/// The result is byte-swapped so that writing it high byte first puts the
/// CRC on the wire in the order Modbus expects (low byte of the raw CRC first).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc.swap_bytes()
}

/// Assembles `address, function, payload..., crc_hi, crc_lo`.
///
/// No validation happens here; callers check address and payload shape.
pub fn build_frame(address: u8, function: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    frame.push(address);
    frame.push(function);
    frame.extend_from_slice(payload);

    let crc = crc16(&frame);
    frame.push((crc >> 8) as u8);
    frame.push(crc as u8);

    frame
}

pub fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A complete, CRC-checked reply frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    status: u8,
    frame: Vec<u8>,
}

impl Response {
    pub(crate) fn new(frame: Vec<u8>) -> Self {
        let status = match frame[1] & EXCEPTION_FLAG {
            0 => STATUS_OK,
            // a rejection must never read as success
            _ if frame[2] == STATUS_OK => ExceptionCode::SlaveFailure.code(),
            _ => frame[2],
        };
        Response { status, frame }
    }

    /// 0 for a normal reply, the exception code byte for an exception reply.
    /// An exception reply carrying code 0 reports slave failure (4).
    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn is_exception(&self) -> bool {
        self.function() & EXCEPTION_FLAG != 0
    }

    pub fn exception(&self) -> Option<ExceptionCode> {
        self.is_exception().then(|| ExceptionCode::from_wire(self.status))
    }

    pub fn address(&self) -> u8 {
        self.frame[0]
    }

    pub fn function(&self) -> u8 {
        self.frame[1]
    }

    /// The whole frame including address and CRC trailer.
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    /// Everything between the function byte and the CRC trailer.
    pub fn payload(&self) -> &[u8] {
        &self.frame[2..self.frame.len() - 2]
    }

    /// Data bytes of a read reply, after the byte count.
    pub fn data(&self) -> &[u8] {
        let payload = self.payload();
        if payload.is_empty() {
            payload
        } else {
            &payload[1..]
        }
    }

    /// Register address echoed by a write reply.
    pub fn echoed_address(&self) -> Option<u16> {
        match self.payload() {
            [hi, lo, ..] => Some(((*hi as u16) << 8) | (*lo as u16)),
            _ => None,
        }
    }

    /// Value (single writes) or quantity (multi writes) echoed by a write reply.
    pub fn echoed_value(&self) -> Option<u16> {
        match self.payload() {
            [_, _, hi, lo] => Some(((*hi as u16) << 8) | (*lo as u16)),
            _ => None,
        }
    }
}
