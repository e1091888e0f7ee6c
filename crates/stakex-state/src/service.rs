use serde::{Deserialize, Serialize};
use stakex_core::{AccountName, Asset, StakexError, Symbol};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

// ── Token settlement ──────────────────────────────────────────────────────────

/// One token movement requested by an action.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Settlement {
    Issue { to: AccountName, quantity: Asset, memo: String },
    Transfer { from: AccountName, to: AccountName, quantity: Asset, memo: String },
}

impl fmt::Display for Settlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Settlement::Issue { to, quantity, memo } => write!(f, "issue {quantity} to {to} ({memo})"),
            Settlement::Transfer { from, to, quantity, memo } => {
                write!(f, "transfer {quantity} {from} -> {to} ({memo})")
            }
        }
    }
}

/// The external token ledger the system settles against.
///
/// Reads happen while an action runs; the action's settlements are handed
/// over in one batch after every state check passed. `settle` must apply
/// the whole batch or none of it, and `revert` must undo a batch that
/// `settle` accepted when the state commit behind it fails.
pub trait TokenService {
    /// Current supply of the token with the symbol's code, if it exists.
    fn supply(&self, symbol: Symbol) -> Result<Option<Asset>, StakexError>;

    fn balance(&self, owner: AccountName, symbol: Symbol) -> Result<Asset, StakexError>;

    fn settle(&mut self, batch: &[Settlement]) -> Result<(), StakexError>;

    fn revert(&mut self, batch: &[Settlement]) -> Result<(), StakexError>;
}

/// In-process token ledger, serialisable so a node can persist it beside
/// the state database.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MemoryLedger {
    pub supplies: BTreeMap<Symbol, i64>,
    pub balances: BTreeMap<AccountName, BTreeMap<Symbol, i64>>,
}

impl MemoryLedger {
    /// Register a token with zero supply.
    pub fn create(&mut self, symbol: Symbol) -> Result<(), StakexError> {
        if self.supplies.keys().any(|s| s.code() == symbol.code()) {
            return Err(StakexError::SettlementFailed(format!("token {symbol} already exists")));
        }
        self.supplies.insert(symbol, 0);
        Ok(())
    }

    fn check_token(&self, quantity: &Asset) -> Result<(), StakexError> {
        if !self.supplies.contains_key(&quantity.symbol) {
            return Err(StakexError::SettlementFailed(format!("unknown token {}", quantity.symbol)));
        }
        if quantity.amount <= 0 || !quantity.is_valid() {
            return Err(StakexError::SettlementFailed(format!("invalid quantity {quantity}")));
        }
        Ok(())
    }

    fn credit(&mut self, to: AccountName, quantity: Asset) -> Result<(), StakexError> {
        let held = self.balances.entry(to).or_default().entry(quantity.symbol).or_insert(0);
        *held = held.checked_add(quantity.amount).ok_or(StakexError::AmountOverflow)?;
        Ok(())
    }

    fn debit(&mut self, from: AccountName, quantity: Asset) -> Result<(), StakexError> {
        let have = self.balance_of(from, quantity.symbol);
        if have < quantity.amount {
            return Err(StakexError::InsufficientFunds {
                need: quantity,
                have: Asset::new(have, quantity.symbol),
            });
        }
        if let Some(held) = self.balances.get_mut(&from).and_then(|b| b.get_mut(&quantity.symbol)) {
            *held -= quantity.amount;
        }
        Ok(())
    }

    fn balance_of(&self, owner: AccountName, symbol: Symbol) -> i64 {
        self.balances
            .get(&owner)
            .and_then(|b| b.get(&symbol))
            .copied()
            .unwrap_or(0)
    }

    fn apply_one(&mut self, settlement: &Settlement) -> Result<(), StakexError> {
        match settlement {
            Settlement::Issue { to, quantity, .. } => {
                self.check_token(quantity)?;
                let supply = self.supplies.entry(quantity.symbol).or_insert(0);
                *supply = supply.checked_add(quantity.amount).ok_or(StakexError::AmountOverflow)?;
                self.credit(*to, *quantity)
            }
            Settlement::Transfer { from, to, quantity, .. } => {
                self.check_token(quantity)?;
                if from == to {
                    return Err(StakexError::SettlementFailed("cannot transfer to self".into()));
                }
                self.debit(*from, *quantity)?;
                self.credit(*to, *quantity)
            }
        }
    }

    fn undo_one(&mut self, settlement: &Settlement) -> Result<(), StakexError> {
        match settlement {
            Settlement::Issue { to, quantity, .. } => {
                self.debit(*to, *quantity)?;
                let supply = self
                    .supplies
                    .get_mut(&quantity.symbol)
                    .ok_or_else(|| StakexError::SettlementFailed(format!("unknown token {}", quantity.symbol)))?;
                *supply -= quantity.amount;
                Ok(())
            }
            Settlement::Transfer { from, to, quantity, .. } => {
                self.debit(*to, *quantity)?;
                self.credit(*from, *quantity)
            }
        }
    }
}

impl TokenService for MemoryLedger {
    fn supply(&self, symbol: Symbol) -> Result<Option<Asset>, StakexError> {
        let code = symbol.code();
        Ok(self
            .supplies
            .iter()
            .find(|(s, _)| s.code() == code)
            .map(|(s, amount)| Asset::new(*amount, *s)))
    }

    fn balance(&self, owner: AccountName, symbol: Symbol) -> Result<Asset, StakexError> {
        Ok(Asset::new(self.balance_of(owner, symbol), symbol))
    }

    fn settle(&mut self, batch: &[Settlement]) -> Result<(), StakexError> {
        let mut next = self.clone();
        for settlement in batch {
            next.apply_one(settlement)?;
            debug!(%settlement, "settled");
        }
        *self = next;
        Ok(())
    }

    fn revert(&mut self, batch: &[Settlement]) -> Result<(), StakexError> {
        let mut prev = self.clone();
        for settlement in batch.iter().rev() {
            prev.undo_one(settlement)?;
            debug!(%settlement, "reverted");
        }
        *self = prev;
        Ok(())
    }
}

// ── Authorization ─────────────────────────────────────────────────────────────

/// Decides whether a set of signers carries an account's authority.
pub trait Authorizer {
    fn satisfies(&self, signers: &[AccountName], required: AccountName) -> bool;
}

/// Authority is held only by the account itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct SignerAuthorizer;

impl Authorizer for SignerAuthorizer {
    fn satisfies(&self, signers: &[AccountName], required: AccountName) -> bool {
        signers.contains(&required)
    }
}
