use std::fmt;

use serde::Serialize;

/// Four-value achievement scale used on every grade record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LiteralGrade {
    AD,
    A,
    B,
    C,
}

impl LiteralGrade {
    pub const ALL: [LiteralGrade; 4] = [
        LiteralGrade::AD,
        LiteralGrade::A,
        LiteralGrade::B,
        LiteralGrade::C,
    ];

    /// Exact match on the stored value, the same set the database filters on.
    /// Anything else is `None` and must be dropped by the caller.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "AD" => Some(LiteralGrade::AD),
            "A" => Some(LiteralGrade::A),
            "B" => Some(LiteralGrade::B),
            "C" => Some(LiteralGrade::C),
            _ => None,
        }
    }

    pub fn ordinal(self) -> u8 {
        match self {
            LiteralGrade::AD => 4,
            LiteralGrade::A => 3,
            LiteralGrade::B => 2,
            LiteralGrade::C => 1,
        }
    }

    /// Nearest literal for a numeric average on the 1-4 scale.
    pub fn from_average(average: f64) -> Option<Self> {
        if !average.is_finite() {
            return None;
        }
        match average.clamp(1.0, 4.0).round() as u8 {
            4 => Some(LiteralGrade::AD),
            3 => Some(LiteralGrade::A),
            2 => Some(LiteralGrade::B),
            _ => Some(LiteralGrade::C),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LiteralGrade::AD => "AD",
            LiteralGrade::A => "A",
            LiteralGrade::B => "B",
            LiteralGrade::C => "C",
        }
    }
}

impl fmt::Display for LiteralGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_scale_to_ordinals() {
        assert_eq!(LiteralGrade::AD.ordinal(), 4);
        assert_eq!(LiteralGrade::A.ordinal(), 3);
        assert_eq!(LiteralGrade::B.ordinal(), 2);
        assert_eq!(LiteralGrade::C.ordinal(), 1);
    }

    #[test]
    fn parse_rejects_case_and_padding_variants() {
        assert_eq!(LiteralGrade::parse("AD"), Some(LiteralGrade::AD));
        assert_eq!(LiteralGrade::parse("ad"), None);
        assert_eq!(LiteralGrade::parse(" b"), None);
        assert_eq!(LiteralGrade::parse("C "), None);
    }

    #[test]
    fn unknown_values_are_not_grades() {
        assert_eq!(LiteralGrade::parse("D"), None);
        assert_eq!(LiteralGrade::parse(""), None);
        assert_eq!(LiteralGrade::parse("15"), None);
    }

    #[test]
    fn averages_map_back_to_nearest_literal() {
        assert_eq!(LiteralGrade::from_average(3.6), Some(LiteralGrade::AD));
        assert_eq!(LiteralGrade::from_average(3.49), Some(LiteralGrade::A));
        assert_eq!(LiteralGrade::from_average(2.5), Some(LiteralGrade::A));
        assert_eq!(LiteralGrade::from_average(1.2), Some(LiteralGrade::C));
        assert_eq!(LiteralGrade::from_average(0.0), Some(LiteralGrade::C));
        assert_eq!(LiteralGrade::from_average(f64::NAN), None);
    }
}
