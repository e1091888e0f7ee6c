//! Bancor market between two connectors joined by a pool-share token.
//!
//! Buying into a connector with `dR` issues
//!
//!   dS = S0 × ((1 + dR/R0)^F − 1)
//!
//! pool shares, and redeeming `dS` shares from a connector releases
//!
//!   dR = R0 × (1 − (1 − dS/S0)^(1/F))
//!
//! with F = 0.5 for both connectors. Results are truncated toward zero, so a
//! round trip never returns more than was put in.

use serde::{Deserialize, Serialize};
use stakex_core::{Asset, StakexError, Symbol};

pub const CONNECTOR_WEIGHT: f64 = 0.5;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Connector {
    pub balance: Asset,
    pub weight: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Base,
    Quote,
}

/// One exchange pool. Mutated only through the convert operations.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExchangeState {
    pub supply: Asset,
    pub base: Connector,
    pub quote: Connector,
}

impl ExchangeState {
    pub fn new(supply: Asset, base: Asset, quote: Asset) -> Self {
        Self {
            supply,
            base: Connector { balance: base, weight: CONNECTOR_WEIGHT },
            quote: Connector { balance: quote, weight: CONNECTOR_WEIGHT },
        }
    }

    /// Pay `payment` into one connector and receive pool shares.
    pub fn convert_to_exchange(&mut self, side: Side, payment: Asset) -> Result<Asset, StakexError> {
        let reserve = match side {
            Side::Base => &mut self.base,
            Side::Quote => &mut self.quote,
        };
        if payment.symbol != reserve.balance.symbol {
            return Err(StakexError::InvalidConversion(format!(
                "{} does not match connector {}",
                payment.symbol, reserve.balance.symbol
            )));
        }
        if payment.amount < 0 {
            return Err(StakexError::InvalidConversion("negative payment".into()));
        }
        if self.supply.amount <= 0 || reserve.balance.amount <= 0 {
            return Err(StakexError::InvalidConversion("market is empty".into()));
        }

        let s0 = self.supply.amount as f64;
        let r0 = reserve.balance.amount as f64;
        let dr = payment.amount as f64;
        let ds = (s0 * ((1.0 + dr / r0).powf(reserve.weight) - 1.0)).max(0.0);
        let issued = ds as i64;

        reserve.balance = reserve.balance.checked_add(payment)?;
        self.supply = self.supply.checked_add(Asset::new(issued, self.supply.symbol))?;
        Ok(Asset::new(issued, self.supply.symbol))
    }

    /// Redeem `tokens` pool shares against one connector.
    pub fn convert_from_exchange(&mut self, side: Side, tokens: Asset) -> Result<Asset, StakexError> {
        let reserve = match side {
            Side::Base => &mut self.base,
            Side::Quote => &mut self.quote,
        };
        if tokens.symbol != self.supply.symbol {
            return Err(StakexError::InvalidConversion(format!(
                "{} is not the pool share {}",
                tokens.symbol, self.supply.symbol
            )));
        }
        if tokens.amount < 0 || tokens.amount >= self.supply.amount {
            return Err(StakexError::InvalidConversion("share amount out of range".into()));
        }
        if reserve.balance.amount <= 0 {
            return Err(StakexError::InvalidConversion("connector is empty".into()));
        }

        let r0 = reserve.balance.amount as f64;
        let s0 = self.supply.amount as f64;
        let ds = -(tokens.amount as f64);
        let dr = (r0 * ((1.0 + ds / s0).powf(1.0 / reserve.weight) - 1.0)).min(0.0);
        let released = (-dr) as i64;

        let remaining = reserve.balance.amount - released;
        if remaining <= 0 {
            return Err(StakexError::InvalidConversion("connector would be drained".into()));
        }
        reserve.balance.amount = remaining;
        self.supply = self.supply.checked_sub(tokens)?;
        Ok(Asset::new(released, reserve.balance.symbol))
    }

    /// Convert between the two connector symbols through the pool share.
    pub fn convert(&mut self, from: Asset, to: Symbol) -> Result<Asset, StakexError> {
        if from.symbol == to {
            return Err(StakexError::InvalidConversion("cannot convert to the same symbol".into()));
        }
        let base = self.base.balance.symbol;
        let quote = self.quote.balance.symbol;
        if from.symbol == base && to == quote {
            let shares = self.convert_to_exchange(Side::Base, from)?;
            self.convert_from_exchange(Side::Quote, shares)
        } else if from.symbol == quote && to == base {
            let shares = self.convert_to_exchange(Side::Quote, from)?;
            self.convert_from_exchange(Side::Base, shares)
        } else {
            Err(StakexError::InvalidConversion(format!("{} to {to}", from.symbol)))
        }
    }
}

/// Output of a plain constant-product swap: `in × out_reserve / (in_reserve + in)`.
pub fn get_bancor_output(in_reserve: i64, out_reserve: i64, input: i64) -> Result<i64, StakexError> {
    if in_reserve < 0 || out_reserve < 0 || input < 0 || in_reserve + input == 0 {
        return Err(StakexError::InvalidConversion("invalid bancor output parameters".into()));
    }
    let out = (input as u128 * out_reserve as u128) / (in_reserve as u128 + input as u128);
    Ok(out as i64)
}

/// Input needed to withdraw `output` from a constant-product pair:
/// `in_reserve × out / (out_reserve − out)`.
pub fn get_bancor_input(out_reserve: i64, in_reserve: i64, output: i64) -> Result<i64, StakexError> {
    if out_reserve <= 0 || in_reserve < 0 || output < 0 || output >= out_reserve {
        return Err(StakexError::InvalidConversion("invalid bancor input parameters".into()));
    }
    let input = (in_reserve as u128 * output as u128) / (out_reserve - output) as u128;
    i64::try_from(input).map_err(|_| StakexError::AmountOverflow)
}
