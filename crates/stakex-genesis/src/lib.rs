//! stakex-genesis
//!
//! Bootstraps a fresh chain: creates the core token in the ledger, issues
//! the initial supply to the system account, runs `init` through the
//! engine and pays out the genesis allocations. Staked allocations go
//! through `delegatebw` like any later stake, so voters and resource rows
//! are consistent from the first block.

pub mod params;

pub use params::{Allocation, GenesisParams};

use stakex_core::constants::SYSTEM_ACCOUNT;
use stakex_core::{Action, Asset, SignedAction, StakexError};
use stakex_state::{MemoryLedger, Settlement, SystemEngine, TokenService};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("invalid genesis parameters: {0}")]
    Params(String),

    #[error("allocations of {allocated} exceed the initial supply of {supply}")]
    AllocationsExceedSupply { allocated: i64, supply: i64 },

    #[error("genesis supply mismatch: expected {expected}, got {got}")]
    SupplyMismatch { expected: i64, got: i64 },

    #[error(transparent)]
    State(#[from] StakexError),
}

/// What genesis produced.
#[derive(Clone, Debug, PartialEq)]
pub struct GenesisSummary {
    pub supply: Asset,
    pub allocated: Asset,
    pub staked: Asset,
    pub accounts: usize,
}

/// Apply genesis to an uninitialised engine and an empty ledger.
///
/// Fails without touching either if the engine already holds a global
/// state or the parameters do not validate.
pub fn apply_genesis(
    engine: &SystemEngine,
    ledger: &mut MemoryLedger,
    params: &GenesisParams,
) -> Result<GenesisSummary, GenesisError> {
    params.validate()?;
    if engine.reader().global()?.is_some() {
        return Err(StakexError::AlreadyInitialized.into());
    }
    let core = params.core_symbol;
    let now = params.genesis_timestamp();
    info!(%core, supply = %params.initial_supply, "applying stakex genesis");

    // ── 1. Core token ────────────────────────────────────────────────────────
    ledger.create(core)?;
    ledger.settle(&[Settlement::Issue {
        to: SYSTEM_ACCOUNT,
        quantity: params.initial_supply,
        memo: "genesis supply".into(),
    }])?;

    // ── 2. System state ──────────────────────────────────────────────────────
    engine.apply(&SignedAction::by_required(Action::Init { core_symbol: core }), ledger, now)?;

    // ── 3. Allocations ───────────────────────────────────────────────────────
    let payouts: Vec<Settlement> = params
        .allocations
        .iter()
        .filter_map(|alloc| {
            let total = alloc.liquid.amount + alloc.stake.map(|s| s.amount).unwrap_or(0);
            (total > 0).then(|| Settlement::Transfer {
                from: SYSTEM_ACCOUNT,
                to: alloc.account,
                quantity: Asset::new(total, core),
                memo: "genesis allocation".into(),
            })
        })
        .collect();
    ledger.settle(&payouts)?;

    let mut staked = 0;
    for alloc in &params.allocations {
        let Some(stake) = alloc.stake.filter(|s| s.amount > 0) else { continue };
        let net = stake.amount / 2;
        let action = Action::DelegateBw {
            from: alloc.account,
            receiver: alloc.account,
            stake_net_quantity: Asset::new(net, core),
            stake_cpu_quantity: Asset::new(stake.amount - net, core),
            transfer: false,
        };
        engine.apply(&SignedAction::by_required(action), ledger, now)?;
        staked += stake.amount;
        info!(account = %alloc.account, %stake, "genesis: stake delegated");
    }

    verify_genesis_supply(ledger, params)?;

    let summary = GenesisSummary {
        supply: params.initial_supply,
        allocated: Asset::new(params.allocated(), core),
        staked: Asset::new(staked, core),
        accounts: params.allocations.len(),
    };
    info!(
        allocated = %summary.allocated,
        staked = %summary.staked,
        accounts = summary.accounts,
        "genesis applied"
    );
    Ok(summary)
}

/// The ledger must hold exactly the initial supply, all of it accounted
/// for by balances.
fn verify_genesis_supply(ledger: &MemoryLedger, params: &GenesisParams) -> Result<(), GenesisError> {
    let core = params.core_symbol;
    let expected = params.initial_supply.amount;
    let supply = ledger.supply(core)?.map(|s| s.amount).unwrap_or(0);
    if supply != expected {
        return Err(GenesisError::SupplyMismatch { expected, got: supply });
    }
    let held: i64 = ledger.balances.values().filter_map(|b| b.get(&core)).sum();
    if held != expected {
        return Err(GenesisError::SupplyMismatch { expected, got: held });
    }
    info!(total = expected, "genesis supply verified");
    Ok(())
}
