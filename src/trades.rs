//! Trade types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw trade print from market data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub ts_event: DateTime<Utc>,
    pub price: f64,
    pub size: u64,
    pub side: Side,
    pub symbol: String,
}

/// Aggressor side of a trade.
///
/// `None` covers prints the venue could not classify (Databento `N`); they
/// count toward volume but contribute zero delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
    None,
}

impl Side {
    /// Parse a Databento side code (`B` = buy aggressor, `A` = sell aggressor, `N` = none)
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "B" => Some(Side::Buy),
            "A" => Some(Side::Sell),
            "N" => Some(Side::None),
            _ => None,
        }
    }

    /// Signed volume contributed to CVD
    pub fn signed(self, size: u64) -> i64 {
        match self {
            Side::Buy => size as i64,
            Side::Sell => -(size as i64),
            Side::None => 0,
        }
    }
}

impl Trade {
    /// Signed delta of this print
    pub fn delta(&self) -> i64 {
        self.side.signed(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_codes() {
        assert_eq!(Side::from_code("B"), Some(Side::Buy));
        assert_eq!(Side::from_code("A"), Some(Side::Sell));
        assert_eq!(Side::from_code("N"), Some(Side::None));
        assert_eq!(Side::from_code("X"), None);
    }

    #[test]
    fn test_signed_delta() {
        assert_eq!(Side::Buy.signed(7), 7);
        assert_eq!(Side::Sell.signed(7), -7);
        assert_eq!(Side::None.signed(7), 0);
    }
}
