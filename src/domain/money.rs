//! Fixed-point money. All amount arithmetic in the crate goes through this
//! type; floats never touch balances.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum MoneyError {
    #[error("currency mismatch: {0} vs {1}")]
    CurrencyMismatch(String, String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Money {
    pub amount: BigDecimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: BigDecimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into().to_uppercase(),
        }
    }

    /// Parse a decimal string. Rejects anything BigDecimal cannot represent
    /// exactly, which keeps float artifacts out of the ledger.
    pub fn parse(amount: &str, currency: &str) -> Result<Self, MoneyError> {
        let amount = amount
            .trim()
            .parse::<BigDecimal>()
            .map_err(|_| MoneyError::InvalidAmount(amount.to_string()))?;
        Ok(Self::new(amount, currency))
    }

    pub fn zero(currency: impl Into<String>) -> Self {
        Self::new(BigDecimal::from(0), currency)
    }

    pub fn is_zero(&self) -> bool {
        self.amount == BigDecimal::from(0)
    }

    pub fn is_positive(&self) -> bool {
        self.amount > BigDecimal::from(0)
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        Ok(Money::new(&self.amount + &other.amount, self.currency.clone()))
    }

    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        Ok(Money::new(&self.amount - &other.amount, self.currency.clone()))
    }

    /// Rounding rule for the whole crate: amounts owed are truncated toward
    /// zero (round down, since settlement amounts are non-negative).
    pub fn round_down(&self, scale: i64) -> Money {
        Money::new(self.amount.with_scale(scale), self.currency.clone())
    }

    /// True when this amount settles `target` within `epsilon`. Used by the
    /// crypto path to absorb network-fee deductions on the final deposit.
    pub fn covers(&self, target: &Money, epsilon: &BigDecimal) -> Result<bool, MoneyError> {
        self.same_currency(target)?;
        Ok(self.amount >= &target.amount - epsilon)
    }

    /// The larger of two amounts. Partial-deposit totals are cumulative, so
    /// replays resolve through max() rather than addition.
    pub fn max(&self, other: &Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        if other.amount > self.amount {
            Ok(other.clone())
        } else {
            Ok(self.clone())
        }
    }

    fn same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch(
                self.currency.clone(),
                other.currency.clone(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}
