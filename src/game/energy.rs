//! Energy ownership tags.

use serde::{Serialize, Deserialize};
use std::fmt;

/// Ownership tag of a cell.
///
/// Wire values are part of the protocol surface (`START` carries them).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum Energy {
    /// Nobody owns the cell.
    Neutral = 1,
    /// Owned by the environment (protected cells).
    Other = 2,
    /// Player slot 1.
    P1 = 3,
    /// Player slot 2.
    P2 = 4,
    /// Player slot 3.
    P3 = 5,
    /// Player slot 4.
    P4 = 6,
    /// Player slot 5.
    P5 = 7,
    /// Player slot 6.
    P6 = 8,
    /// Player slot 7.
    P7 = 9,
    /// Player slot 8.
    P8 = 10,
}

/// The eight player energies in slot order.
pub const P_ENERGY: [Energy; 8] = [
    Energy::P1,
    Energy::P2,
    Energy::P3,
    Energy::P4,
    Energy::P5,
    Energy::P6,
    Energy::P7,
    Energy::P8,
];

impl Energy {
    /// Wire value.
    #[inline]
    pub fn value(self) -> u8 {
        self as u8
    }

    /// True for `P1..P8`.
    #[inline]
    pub fn is_player(self) -> bool {
        !matches!(self, Energy::Neutral | Energy::Other)
    }

    /// Decode a wire value.
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(Energy::Neutral),
            2 => Some(Energy::Other),
            3..=10 => P_ENERGY.get((value - 3) as usize).copied(),
            _ => None,
        }
    }
}

impl From<Energy> for u8 {
    fn from(energy: Energy) -> u8 {
        energy.value()
    }
}

impl TryFrom<u8> for Energy {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Energy::from_value(value).ok_or_else(|| format!("invalid energy value {value}"))
    }
}

impl fmt::Display for Energy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Energy::Neutral => write!(f, "NEUTRAL"),
            Energy::Other => write!(f, "OTHER"),
            player => write!(f, "P{}", player.value() - 2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_values() {
        assert_eq!(Energy::Neutral.value(), 1);
        assert_eq!(Energy::Other.value(), 2);
        assert_eq!(Energy::P1.value(), 3);
        assert_eq!(Energy::P8.value(), 10);
        for value in 1..=10 {
            assert_eq!(Energy::from_value(value).map(Energy::value), Some(value));
        }
        assert_eq!(Energy::from_value(0), None);
        assert_eq!(Energy::from_value(11), None);
    }

    #[test]
    fn test_serde_as_integer() {
        assert_eq!(serde_json::to_string(&Energy::P2).unwrap(), "4");
        let energy: Energy = serde_json::from_str("7").unwrap();
        assert_eq!(energy, Energy::P5);
        assert!(serde_json::from_str::<Energy>("42").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Energy::P3.to_string(), "P3");
        assert_eq!(Energy::Neutral.to_string(), "NEUTRAL");
        assert!(!Energy::Other.is_player());
        assert!(Energy::P7.is_player());
    }
}
