//! Monetary types for the ledger.
//!
//! Balances and amounts are integers in the smallest unit of their currency.
//! Currency is a tag on a balance; nothing here converts between currencies.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerError;

/// Supported currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Gbp,
    Eur,
}

impl Currency {
    /// All supported currencies.
    pub const ALL: [Currency; 3] = [Currency::Usd, Currency::Gbp, Currency::Eur];

    /// ISO 4217 code.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Gbp => "GBP",
            Currency::Eur => "EUR",
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Currency::Usd => "American Dollar",
            Currency::Gbp => "Pound Sterling",
            Currency::Eur => "Euro",
        }
    }

    /// Number of minor-unit decimal places.
    pub fn decimal_places(&self) -> u32 {
        2
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::Gbp
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "GBP" => Ok(Currency::Gbp),
            "EUR" => Ok(Currency::Eur),
            other => Err(LedgerError::validation(
                "currency",
                format!("unsupported currency: {other}"),
            )),
        }
    }
}

/// A strictly positive amount in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u64")]
pub struct Amount(u64);

impl Amount {
    /// Create an amount, rejecting zero.
    pub fn new(value: u64) -> Result<Self, LedgerError> {
        if value == 0 {
            return Err(LedgerError::InvalidAmount(0));
        }
        Ok(Self(value))
    }

    /// Get the value in minor units.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = LedgerError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value <= 0 {
            return Err(LedgerError::InvalidAmount(value));
        }
        Ok(Self(value as u64))
    }
}

impl From<Amount> for u64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A minor-unit value paired with its currency, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Value in minor units.
    pub minor: u64,
    /// Currency of the value.
    pub currency: Currency,
}

impl Money {
    /// Create a new Money instance.
    pub fn new(minor: u64, currency: Currency) -> Self {
        Self { minor, currency }
    }

    /// Value in major units, e.g. 1050 GBP minor -> 10.50.
    pub fn major(&self) -> Decimal {
        let places = self.currency.decimal_places();
        let mut value = Decimal::from(self.minor);
        value.set_scale(places).unwrap_or_default();
        value
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let places = self.currency.decimal_places() as usize;
        write!(f, "{:.*} {}", places, self.major(), self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_parse() {
        assert_eq!("gbp".parse::<Currency>().unwrap(), Currency::Gbp);
        assert_eq!(" EUR ".parse::<Currency>().unwrap(), Currency::Eur);
        assert!(matches!(
            "JPY".parse::<Currency>(),
            Err(LedgerError::Validation { .. })
        ));
    }

    #[test]
    fn test_currency_serde() {
        let json = serde_json::to_string(&Currency::Usd).unwrap();
        assert_eq!(json, "\"USD\"");
        let back: Currency = serde_json::from_str("\"EUR\"").unwrap();
        assert_eq!(back, Currency::Eur);
    }

    #[test]
    fn test_amount_validation() {
        assert_eq!(Amount::new(5).unwrap().value(), 5);
        assert_eq!(Amount::new(0), Err(LedgerError::InvalidAmount(0)));
        assert_eq!(Amount::try_from(-3), Err(LedgerError::InvalidAmount(-3)));
        assert!(serde_json::from_str::<Amount>("0").is_err());
        assert_eq!(serde_json::from_str::<Amount>("12").unwrap().value(), 12);
    }

    #[test]
    fn test_money_display() {
        assert_eq!(Money::new(1000, Currency::Gbp).to_string(), "10.00 GBP");
        assert_eq!(Money::new(1050, Currency::Usd).to_string(), "10.50 USD");
        assert_eq!(Money::new(7, Currency::Eur).to_string(), "0.07 EUR");
    }
}
