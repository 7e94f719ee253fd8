use crate::constants::{
    AllowedUnits, Command, Unit, FRAME_RESERVED, HEADER_LEN, LENGTH_OVERHEAD, MAGIC_HEADER,
    OFFSET_CHECKSUM, OFFSET_LENGTH, OFFSET_OPCODE, OFFSET_RESERVED, OFFSET_SEQUENCE,
};

pub const FIRST_SEQUENCE: u8 = 1;

/// A typed command ready to be framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    EnableUnits(AllowedUnits),
    Sleep,
    SetTimeout(u16),
    SetUnit(Unit),
    WeightRequest,
    PowerOn,
    Tare,
}

impl Request {
    pub fn command(&self) -> Command {
        match *self {
            Request::EnableUnits(_) => Command::EnableUnits,
            Request::Sleep => Command::Sleep,
            Request::SetTimeout(_) => Command::SetTimeout,
            Request::SetUnit(_) => Command::SetUnit,
            Request::WeightRequest => Command::Weight,
            Request::PowerOn => Command::PowerOn,
            Request::Tare => Command::Tare,
        }
    }

    pub fn argument(&self) -> Option<u16> {
        match *self {
            Request::EnableUnits(units) => Some(units.bits()),
            Request::SetTimeout(seconds) => Some(seconds),
            Request::SetUnit(unit) => Some(unit.value()),
            Request::Sleep | Request::WeightRequest | Request::PowerOn | Request::Tare => None,
        }
    }

    pub fn encode(&self, sequence: u8) -> Vec<u8> {
        match self.argument() {
            Some(value) => encode(sequence, self.command(), &value.to_le_bytes()),
            None => encode(sequence, self.command(), &[]),
        }
    }
}

pub fn encode(sequence: u8, command: Command, payload: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0u8; HEADER_LEN + payload.len()];
    bytes[..2].copy_from_slice(&MAGIC_HEADER);
    bytes[OFFSET_SEQUENCE] = sequence;

    let length = payload.len() as u16 + LENGTH_OVERHEAD;
    bytes[OFFSET_LENGTH..OFFSET_LENGTH + 2].copy_from_slice(&length.to_le_bytes());
    bytes[OFFSET_RESERVED] = FRAME_RESERVED;
    bytes[OFFSET_OPCODE..OFFSET_OPCODE + 2].copy_from_slice(&command.value().to_le_bytes());
    bytes[HEADER_LEN..].copy_from_slice(payload);

    bytes[OFFSET_CHECKSUM] = checksum(&bytes);
    bytes
}

/// `0xff - (sum mod 256)` over the frame, reading the checksum byte as zero.
pub fn checksum(frame: &[u8]) -> u8 {
    let sum = frame
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != OFFSET_CHECKSUM)
        .fold(0u8, |acc, (_, &byte)| acc.wrapping_add(byte));
    0xff - sum
}
