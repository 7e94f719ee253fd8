use std::fmt;

use btleplug::api::bleuuid::uuid_from_u16;
use uuid::Uuid;

pub const MAGIC_HEADER: [u8; 2] = [0xa5, 0x22];

/// Value of the fixed byte at offset 6 of every outgoing frame.
pub(crate) const FRAME_RESERVED: u8 = 0x01;
/// Bytes before the payload: magic, sequence, length, checksum, reserved, opcode and a zero pad.
pub const HEADER_LEN: usize = 10;
/// Bytes counted by the length field besides the payload (reserved, opcode, pad).
pub(crate) const LENGTH_OVERHEAD: u16 = 4;

pub(crate) const OFFSET_SEQUENCE: usize = 2;
pub(crate) const OFFSET_LENGTH: usize = 3;
pub(crate) const OFFSET_CHECKSUM: usize = 5;
pub(crate) const OFFSET_RESERVED: usize = 6;
pub(crate) const OFFSET_OPCODE: usize = 7;

pub const HW_REV_CHARACTERISTIC_UUID: Uuid = uuid_from_u16(0x2A27);
pub const SW_REV_CHARACTERISTIC_UUID: Uuid = uuid_from_u16(0x2A28);
pub const TX_CHARACTERISTIC_UUID: Uuid = uuid_from_u16(0xFFF2);
pub const RX_CHARACTERISTIC_UUID: Uuid = uuid_from_u16(0xFFF1);

pub const ADV_MANUFACTURER_ID: u16 = 0x06D0;
pub const ADV_MANUFACTURER_DATA: [u8; 9] = [0x01, 0x07, 0x98, 0x41, 0x00, 0x4D, 0xD0, 0x02, 0x01];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    EnableUnits,
    Sleep,
    SetTimeout,
    SetUnit,
    Weight,
    PowerOn,
    Tare,
}

impl Command {
    pub fn value(&self) -> u16 {
        match *self {
            Command::EnableUnits => 0x4102,
            Command::Sleep => 0xA001,
            Command::SetTimeout => 0xA104,
            Command::SetUnit => 0xA180,
            Command::Weight => 0xA183,
            Command::PowerOn => 0xA184,
            Command::Tare => 0xA185,
        }
    }

    pub fn from_value(value: u16) -> Option<Self> {
        match value {
            0x4102 => Some(Command::EnableUnits),
            0xA001 => Some(Command::Sleep),
            0xA104 => Some(Command::SetTimeout),
            0xA180 => Some(Command::SetUnit),
            0xA183 => Some(Command::Weight),
            0xA184 => Some(Command::PowerOn),
            0xA185 => Some(Command::Tare),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sign {
    Positive,
    Negative,
}

impl Sign {
    pub fn value(&self) -> u8 {
        match *self {
            Sign::Positive => 0,
            Sign::Negative => 1,
        }
    }

    /// Anything other than the negative flag reads as positive.
    pub fn from_value(value: u8) -> Self {
        if value == Sign::Negative.value() {
            Sign::Negative
        } else {
            Sign::Positive
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Ounce,
    PoundOunce,
    Gram,
    MilliliterWater,
    OunceWater,
    MilliliterMilk,
    OunceMilk,
}

impl Unit {
    pub const ALL: [Unit; 7] = [
        Unit::Ounce,
        Unit::PoundOunce,
        Unit::Gram,
        Unit::MilliliterWater,
        Unit::OunceWater,
        Unit::MilliliterMilk,
        Unit::OunceMilk,
    ];

    pub fn value(&self) -> u16 {
        match *self {
            Unit::Ounce => 0,
            Unit::PoundOunce => 1,
            Unit::Gram => 2,
            Unit::MilliliterWater => 259,
            Unit::OunceWater => 260,
            Unit::MilliliterMilk => 515,
            Unit::OunceMilk => 516,
        }
    }

    pub fn from_value(value: u16) -> Option<Self> {
        Unit::ALL.into_iter().find(|unit| unit.value() == value)
    }

    /// Divisor turning the raw integer reading into the unit-scaled value.
    pub fn precision(&self) -> f64 {
        match *self {
            Unit::Gram | Unit::MilliliterWater | Unit::MilliliterMilk => 10.0,
            Unit::Ounce | Unit::PoundOunce | Unit::OunceWater | Unit::OunceMilk => 100.0,
        }
    }

    /// Device-internal raw counts per unit; grams are the reference.
    pub fn calibration(&self) -> f64 {
        match *self {
            Unit::Ounce | Unit::PoundOunce => 176.35,
            Unit::Gram | Unit::MilliliterWater => 5000.0,
            Unit::OunceWater => 169.1,
            Unit::MilliliterMilk => 4854.0,
            Unit::OunceMilk => 164.1,
        }
    }

    /// The bit this unit occupies in [`AllowedUnits`].
    pub fn allowed(&self) -> AllowedUnits {
        match *self {
            Unit::Ounce => AllowedUnits::OUNCE,
            Unit::PoundOunce => AllowedUnits::POUND_OUNCE,
            Unit::Gram => AllowedUnits::GRAM,
            Unit::MilliliterWater => AllowedUnits::ML_WATER,
            Unit::OunceWater => AllowedUnits::OUNCE_WATER,
            Unit::MilliliterMilk => AllowedUnits::ML_MILK,
            Unit::OunceMilk => AllowedUnits::OUNCE_MILK,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Unit::Ounce => "oz",
            Unit::PoundOunce => "lb:oz",
            Unit::Gram => "g",
            Unit::MilliliterWater => "ml (water)",
            Unit::OunceWater => "fl oz (water)",
            Unit::MilliliterMilk => "ml (milk)",
            Unit::OunceMilk => "fl oz (milk)",
        };
        f.write_str(name)
    }
}

bitflags::bitflags! {
    /// Units the physical button on the scale may cycle through.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AllowedUnits: u16 {
        const OUNCE = 0x01;
        const POUND_OUNCE = 0x02;
        const OUNCE_WATER = 0x04;
        const OUNCE_MILK = 0x08;
        const GRAM = 0x10;
        const ML_WATER = 0x20;
        const ML_MILK = 0x40;
    }
}

impl Default for AllowedUnits {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_codes_round_trip() {
        for unit in Unit::ALL {
            assert_eq!(Unit::from_value(unit.value()), Some(unit));
        }
        assert_eq!(Unit::from_value(3), None);
    }

    #[test]
    fn command_opcodes_round_trip() {
        assert_eq!(Command::from_value(0xA185), Some(Command::Tare));
        assert_eq!(Command::from_value(0x4102), Some(Command::EnableUnits));
        assert_eq!(Command::from_value(0x1234), None);
    }

    #[test]
    fn sign_treats_unknown_flag_as_positive() {
        assert_eq!(Sign::from_value(1), Sign::Negative);
        assert_eq!(Sign::from_value(0), Sign::Positive);
        assert_eq!(Sign::from_value(7), Sign::Positive);
    }

    #[test]
    fn allowed_units_behave_as_bit_set() {
        let fluids = AllowedUnits::OUNCE_WATER
            | AllowedUnits::OUNCE_MILK
            | AllowedUnits::ML_WATER
            | AllowedUnits::ML_MILK;
        let all = AllowedUnits::all();
        let solids = AllowedUnits::OUNCE | AllowedUnits::POUND_OUNCE | AllowedUnits::GRAM;

        assert_eq!(fluids ^ all, solids);
        assert_eq!(fluids & solids, AllowedUnits::empty());
        assert_eq!(
            (AllowedUnits::GRAM | AllowedUnits::OUNCE) | AllowedUnits::ML_MILK,
            AllowedUnits::GRAM | (AllowedUnits::OUNCE | AllowedUnits::ML_MILK)
        );
        assert_eq!(all.bits(), 0x7f);
        assert_eq!(AllowedUnits::from_bits(fluids.bits()), Some(fluids));
        assert_eq!(AllowedUnits::from_bits(0x80), None);
    }

    #[test]
    fn every_unit_has_its_own_allowed_bit() {
        let combined = Unit::ALL
            .iter()
            .fold(AllowedUnits::empty(), |acc, unit| acc | unit.allowed());
        assert_eq!(combined, AllowedUnits::all());
    }
}
