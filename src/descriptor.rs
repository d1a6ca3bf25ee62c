//! Descriptor keys: the (F, X, Y) triple packed into 16 bits.

use std::fmt;
use std::str::FromStr;

/// Descriptor class (the F field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorClass {
    Element,
    Replication,
    Operator,
    Sequence,
}

/// A 16-bit descriptor key: F (2 bits), X (6 bits), Y (8 bits).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Descriptor(u16);

impl Descriptor {
    pub const fn new(f: u8, x: u8, y: u8) -> Self {
        Descriptor(((f as u16 & 0x3) << 14) | ((x as u16 & 0x3f) << 8) | y as u16)
    }

    /// Build from the packed wire representation (section 3 stores two bytes per descriptor).
    pub const fn from_u16(raw: u16) -> Self {
        Descriptor(raw)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    pub const fn f(self) -> u8 {
        (self.0 >> 14) as u8
    }

    pub const fn x(self) -> u8 {
        ((self.0 >> 8) & 0x3f) as u8
    }

    pub const fn y(self) -> u8 {
        (self.0 & 0xff) as u8
    }

    pub fn class(self) -> DescriptorClass {
        match self.f() {
            0 => DescriptorClass::Element,
            1 => DescriptorClass::Replication,
            2 => DescriptorClass::Operator,
            _ => DescriptorClass::Sequence,
        }
    }

    /// Class 31 elements (replication factors, associated field significance) are
    /// never treated as missing and ignore width/scale operators.
    pub fn is_class31(self) -> bool {
        self.f() == 0 && self.x() == 31
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}-{:03}", self.f(), self.x(), self.y())
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Descriptor({})", self)
    }
}

impl FromStr for Descriptor {
    type Err = String;

    /// Parses `F-XX-YYY` (dashes optional, e.g. `012101`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != '-').collect();
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("invalid descriptor: {s}"));
        }
        let f: u8 = digits[0..1].parse().map_err(|_| format!("invalid F in {s}"))?;
        let x: u8 = digits[1..3].parse().map_err(|_| format!("invalid X in {s}"))?;
        let y: u16 = digits[3..6].parse().map_err(|_| format!("invalid Y in {s}"))?;
        if f > 3 || x > 63 || y > 255 {
            return Err(format!("descriptor out of range: {s}"));
        }
        Ok(Descriptor::new(f, x, y as u8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_fxy() {
        let d = Descriptor::new(3, 1, 11);
        assert_eq!(d.as_u16(), 0xC10B);
        assert_eq!((d.f(), d.x(), d.y()), (3, 1, 11));
        assert_eq!(d.class(), DescriptorClass::Sequence);
    }

    #[test]
    fn display_and_parse() {
        let d: Descriptor = "0-12-101".parse().unwrap();
        assert_eq!(d, Descriptor::new(0, 12, 101));
        assert_eq!(d.to_string(), "0-12-101");
        assert_eq!("101000".parse::<Descriptor>().unwrap(), Descriptor::new(1, 1, 0));
        assert!("4-00-000".parse::<Descriptor>().is_err());
        assert!("0-12-1".parse::<Descriptor>().is_err());
    }

    #[test]
    fn class31() {
        assert!(Descriptor::new(0, 31, 1).is_class31());
        assert!(!Descriptor::new(0, 12, 1).is_class31());
    }
}
