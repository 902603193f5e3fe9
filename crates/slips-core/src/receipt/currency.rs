//! Fixed-rate currency normalization to ZAR.

use std::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SlipsError};

/// Currencies with a fixed conversion rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Zar,
    Usd,
    Gbp,
}

impl Currency {
    /// Parse an ISO code or a common symbol.
    pub fn from_code(code: &str) -> Result<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "ZAR" | "R" => Ok(Currency::Zar),
            "USD" | "$" | "US$" => Ok(Currency::Usd),
            "GBP" | "£" => Ok(Currency::Gbp),
            _ => Err(SlipsError::UnsupportedCurrency(code.trim().to_string())),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Zar => "ZAR",
            Currency::Usd => "USD",
            Currency::Gbp => "GBP",
        }
    }

    /// ZAR per unit of this currency.
    pub fn rate_to_zar(&self) -> Decimal {
        match self {
            Currency::Zar => Decimal::ONE,
            Currency::Usd => Decimal::new(1850, 2),
            Currency::Gbp => Decimal::new(2250, 2),
        }
    }

    /// Convert an amount to ZAR, rounded half away from zero to exactly two decimals.
    ///
    /// Fails when the product does not fit in a `Decimal`.
    pub fn to_zar(&self, amount: Decimal) -> Result<Decimal> {
        let mut zar = amount
            .checked_mul(self.rate_to_zar())
            .ok_or_else(|| {
                SlipsError::Classification(format!("total {} {} is out of range", amount, self.code()))
            })?
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        zar.rescale(2);
        Ok(zar)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
