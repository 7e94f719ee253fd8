use crate::constants::{
    AllowedUnits, Command, Sign, Unit, HEADER_LEN, MAGIC_HEADER, OFFSET_CHECKSUM, OFFSET_LENGTH,
    OFFSET_OPCODE, OFFSET_RESERVED, OFFSET_SEQUENCE,
};
use crate::encoding::{checksum, Request};
use crate::error::FrameError;

/// Length a weight notification must have: header, sign, magnitude, unit, stability.
const WEIGHT_FRAME_LEN: usize = HEADER_LEN + 6;

/// Read-only view over the header fields of a frame.
///
/// Construction only requires the bytes up to the opcode; nothing else is checked,
/// since notifications are trusted once their opcode is recognised. Use
/// [`Frame::parse_checked`] where integrity matters.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    bytes: &'a [u8],
}

impl<'a> TryFrom<&'a [u8]> for Frame<'a> {
    type Error = FrameError;

    fn try_from(bytes: &'a [u8]) -> Result<Self, Self::Error> {
        let expected = OFFSET_OPCODE + 2;
        if bytes.len() < expected {
            return Err(FrameError::TooShort { expected, actual: bytes.len() });
        }
        Ok(Frame { bytes })
    }
}

impl<'a> Frame<'a> {
    /// Parses a frame and validates magic, length field and checksum.
    pub fn parse_checked(bytes: &'a [u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_LEN {
            return Err(FrameError::TooShort { expected: HEADER_LEN, actual: bytes.len() });
        }
        let frame = Frame { bytes };
        if frame.magic() != MAGIC_HEADER {
            return Err(FrameError::BadMagic(frame.magic()));
        }
        let declared = frame.length() as usize;
        let actual = bytes.len() - OFFSET_RESERVED;
        if declared != actual {
            return Err(FrameError::LengthMismatch { declared, actual });
        }
        frame.verify_checksum()?;
        Ok(frame)
    }

    pub fn magic(&self) -> [u8; 2] {
        [self.bytes[0], self.bytes[1]]
    }

    pub fn sequence(&self) -> u8 {
        self.bytes[OFFSET_SEQUENCE]
    }

    pub fn length(&self) -> u16 {
        read_u16(self.bytes, OFFSET_LENGTH)
    }

    pub fn stored_checksum(&self) -> u8 {
        self.bytes[OFFSET_CHECKSUM]
    }

    pub fn opcode(&self) -> u16 {
        read_u16(self.bytes, OFFSET_OPCODE)
    }

    pub fn command(&self) -> Option<Command> {
        Command::from_value(self.opcode())
    }

    pub fn payload(&self) -> &'a [u8] {
        self.bytes.get(HEADER_LEN..).unwrap_or(&[])
    }

    pub fn verify_checksum(&self) -> Result<(), FrameError> {
        let expected = checksum(self.bytes);
        let actual = self.stored_checksum();
        if expected != actual {
            return Err(FrameError::ChecksumMismatch { expected, actual });
        }
        Ok(())
    }
}

impl TryFrom<&Frame<'_>> for Request {
    type Error = FrameError;

    fn try_from(frame: &Frame<'_>) -> Result<Self, Self::Error> {
        let command = frame
            .command()
            .ok_or(FrameError::UnknownCommand(frame.opcode()))?;
        let argument = || {
            let payload = frame.payload();
            if payload.len() < 2 {
                return Err(FrameError::TooShort {
                    expected: HEADER_LEN + 2,
                    actual: HEADER_LEN + payload.len(),
                });
            }
            Ok(read_u16(payload, 0))
        };

        Ok(match command {
            Command::EnableUnits => {
                let bits = argument()?;
                Request::EnableUnits(
                    AllowedUnits::from_bits(bits).ok_or(FrameError::InvalidUnits(bits))?,
                )
            }
            Command::Sleep => Request::Sleep,
            Command::SetTimeout => Request::SetTimeout(argument()?),
            Command::SetUnit => {
                let code = argument()?;
                Request::SetUnit(Unit::from_value(code).ok_or(FrameError::UnknownUnit(code))?)
            }
            Command::Weight => Request::WeightRequest,
            Command::PowerOn => Request::PowerOn,
            Command::Tare => Request::Tare,
        })
    }
}

/// A single weight report as the device sends it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightReading {
    pub sign: Sign,
    pub raw: u16,
    pub unit: Unit,
    pub stable: bool,
}

impl WeightReading {
    /// Signed reading in the reported unit.
    pub fn value(&self) -> f64 {
        let value = self.raw as f64 / self.unit.precision();
        match self.sign {
            Sign::Positive => value,
            Sign::Negative => -value,
        }
    }

    pub fn grams(&self) -> f64 {
        self.value() * (Unit::Gram.calibration() / self.unit.calibration())
    }
}

impl TryFrom<&[u8]> for WeightReading {
    type Error = FrameError;

    fn try_from(frame: &[u8]) -> Result<Self, Self::Error> {
        if frame.len() < WEIGHT_FRAME_LEN {
            return Err(FrameError::TooShort { expected: WEIGHT_FRAME_LEN, actual: frame.len() });
        }
        let data = &frame[HEADER_LEN..];
        let code = read_u16(data, 3);
        let unit = Unit::from_value(code).ok_or(FrameError::UnknownUnit(code))?;

        Ok(WeightReading {
            sign: Sign::from_value(data[0]),
            raw: read_u16(data, 1),
            unit,
            stable: data[5] != 0,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Sleep,
    Weight(WeightReading),
    Unknown { opcode: u16, payload: Vec<u8> },
}

impl TryFrom<&[u8]> for Notification {
    type Error = FrameError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let frame = Frame::try_from(bytes)?;
        match frame.command() {
            Some(Command::Sleep) => Ok(Notification::Sleep),
            Some(Command::Weight) => Ok(Notification::Weight(WeightReading::try_from(bytes)?)),
            _ => Ok(Notification::Unknown {
                opcode: frame.opcode(),
                payload: frame.payload().to_vec(),
            }),
        }
    }
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}
