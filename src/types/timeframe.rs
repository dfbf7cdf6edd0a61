use serde::{Deserialize, Serialize};

/// One of the seven candle aggregations the trainer builds a pattern
/// memory for, in the fixed order the trainer processes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    H1,
    H2,
    H4,
    H8,
    H12,
    D1,
    W1,
}

impl Timeframe {
    /// All seven timeframes in the trainer's fixed processing order.
    pub const ALL: [Timeframe; 7] = [
        Timeframe::H1,
        Timeframe::H2,
        Timeframe::H4,
        Timeframe::H8,
        Timeframe::H12,
        Timeframe::D1,
        Timeframe::W1,
    ];

    /// The on-disk / wire suffix used in file names (`memories_<tf>.txt`
    /// etc.) and venue interval strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H8 => "8h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::H1 => 3_600,
            Timeframe::H2 => 7_200,
            Timeframe::H4 => 14_400,
            Timeframe::H8 => 28_800,
            Timeframe::H12 => 43_200,
            Timeframe::D1 => 86_400,
            Timeframe::W1 => 604_800,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_has_seven_in_fixed_order() {
        assert_eq!(Timeframe::ALL.len(), 7);
        assert_eq!(Timeframe::ALL[0], Timeframe::H1);
        assert_eq!(Timeframe::ALL[6], Timeframe::W1);
    }
}
