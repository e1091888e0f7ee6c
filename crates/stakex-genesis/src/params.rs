use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stakex_core::{AccountName, Asset, Symbol, SystemParams, Timestamp};

use crate::GenesisError;

/// One account funded at genesis.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Allocation {
    pub account: AccountName,
    /// Tokens credited to the account's balance.
    pub liquid: Asset,
    /// Tokens staked to the account itself, split evenly between net and cpu.
    #[serde(default)]
    pub stake: Option<Asset>,
}

impl Allocation {
    fn staked_amount(&self) -> i64 {
        self.stake.map(|s| s.amount).unwrap_or(0)
    }
}

/// Everything a fresh chain needs: the core token, its initial holders and
/// the economics the engine will run under.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GenesisParams {
    pub core_symbol: Symbol,
    /// Issued to the system account before allocations are paid out of it.
    pub initial_supply: Asset,
    pub genesis_time: DateTime<Utc>,
    #[serde(default)]
    pub allocations: Vec<Allocation>,
    #[serde(default)]
    pub system: SystemParams,
}

impl GenesisParams {
    pub fn from_json(json: &str) -> Result<Self, GenesisError> {
        serde_json::from_str(json).map_err(|e| GenesisError::Params(e.to_string()))
    }

    pub fn genesis_timestamp(&self) -> Timestamp {
        self.genesis_time.timestamp()
    }

    /// Sum of liquid and staked tokens handed out.
    pub fn allocated(&self) -> i64 {
        self.allocations
            .iter()
            .map(|a| a.liquid.amount.saturating_add(a.staked_amount()))
            .fold(0i64, i64::saturating_add)
    }

    pub fn validate(&self) -> Result<(), GenesisError> {
        if self.initial_supply.symbol != self.core_symbol || self.initial_supply.amount <= 0 {
            return Err(GenesisError::Params(format!(
                "initial supply {} must be a positive amount of {}",
                self.initial_supply, self.core_symbol
            )));
        }
        for alloc in &self.allocations {
            let assets = std::iter::once(alloc.liquid).chain(alloc.stake);
            for asset in assets {
                if asset.symbol != self.core_symbol || asset.amount < 0 {
                    return Err(GenesisError::Params(format!(
                        "allocation to {} must be a non-negative amount of {}",
                        alloc.account, self.core_symbol
                    )));
                }
            }
        }
        let allocated = self.allocated();
        if allocated > self.initial_supply.amount {
            return Err(GenesisError::AllocationsExceedSupply {
                allocated,
                supply: self.initial_supply.amount,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "core_symbol": "4,SYS",
        "initial_supply": "1000000.0000 SYS",
        "genesis_time": "2026-01-01T00:00:00Z",
        "allocations": [
            { "account": "alice", "liquid": "100.0000 SYS", "stake": "50.0000 SYS" },
            { "account": "bob", "liquid": "10.0000 SYS" }
        ],
        "system": { "min_activated_stake": 10000000 }
    }"#;

    #[test]
    fn parses_from_json() {
        let params = GenesisParams::from_json(JSON).unwrap();
        assert_eq!(params.core_symbol.code(), "SYS");
        assert_eq!(params.genesis_timestamp(), 1_767_225_600);
        assert_eq!(params.allocations.len(), 2);
        assert!(params.allocations[1].stake.is_none());
        assert_eq!(params.allocated(), 160_0000);
        assert_eq!(params.system.min_activated_stake, 10_000_000);
        assert_eq!(params.system.loan_term_secs, SystemParams::default().loan_term_secs);
        params.validate().unwrap();
    }

    #[test]
    fn rejects_over_allocation() {
        let mut params = GenesisParams::from_json(JSON).unwrap();
        params.initial_supply.amount = 100_0000;
        assert!(matches!(
            params.validate(),
            Err(GenesisError::AllocationsExceedSupply { allocated: 160_0000, supply: 100_0000 })
        ));
    }

    #[test]
    fn rejects_foreign_symbol() {
        let mut params = GenesisParams::from_json(JSON).unwrap();
        params.allocations[0].liquid.symbol = Symbol::constant("EOS", 4);
        assert!(matches!(params.validate(), Err(GenesisError::Params(_))));
    }
}
