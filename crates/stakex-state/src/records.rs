use serde::{Deserialize, Serialize};
use stakex_core::constants::{DEFAULT_MAX_RAM_SIZE, MAX_SUPPORTED_REVISION, REX_SYMBOL};
use stakex_core::{AccountName, Asset, ProducerKey, ResourceKind, StakexError, Symbol, Timestamp};
use stakex_econ::{MaturityBuckets, PayShareTotals};

// ── Global state ──────────────────────────────────────────────────────────────

/// Singleton accounting record of the whole system.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GlobalState {
    pub revision: u8,
    pub core_symbol: Symbol,
    pub max_ram_size: u64,
    pub total_ram_bytes_reserved: u64,
    pub total_ram_stake: i64,
    pub last_producer_schedule_update: Timestamp,
    /// Zero until the first block after activation.
    pub last_pervote_bucket_fill: Timestamp,
    pub perblock_bucket: i64,
    pub pervote_bucket: i64,
    pub perwitness_bucket: i64,
    pub total_unpaid_blocks: u32,
    pub total_unpaid_votes: i64,
    pub total_activated_stake: i64,
    /// Zero until `total_activated_stake` first reaches the minimum.
    pub thresh_activated_stake_time: Timestamp,
    pub last_producer_schedule_size: u16,
    pub proposed_schedule: Vec<AccountName>,
    pub total_producer_vote_weight: f64,
    pub last_name_close: Timestamp,
    /// Vote-weight pay-share stream.
    pub vote_pay: PayShareTotals,
    /// Validator-status pay-share stream.
    pub witness_pay: PayShareTotals,
}

impl GlobalState {
    pub fn new(core_symbol: Symbol, now: Timestamp) -> Self {
        Self {
            revision: 0,
            core_symbol,
            max_ram_size: DEFAULT_MAX_RAM_SIZE,
            total_ram_bytes_reserved: 0,
            total_ram_stake: 0,
            last_producer_schedule_update: 0,
            last_pervote_bucket_fill: 0,
            perblock_bucket: 0,
            pervote_bucket: 0,
            perwitness_bucket: 0,
            total_unpaid_blocks: 0,
            total_unpaid_votes: 0,
            total_activated_stake: 0,
            thresh_activated_stake_time: 0,
            last_producer_schedule_size: 0,
            proposed_schedule: Vec::new(),
            total_producer_vote_weight: 0.0,
            last_name_close: 0,
            vote_pay: PayShareTotals { last_update: now, ..Default::default() },
            witness_pay: PayShareTotals { last_update: now, ..Default::default() },
        }
    }

    pub fn free_ram(&self) -> u64 {
        self.max_ram_size.saturating_sub(self.total_ram_bytes_reserved)
    }

    pub fn core(&self, amount: i64) -> Asset {
        Asset::new(amount, self.core_symbol)
    }

    /// Step the revision by exactly one, running the migration for it.
    pub fn migrate_to(&mut self, revision: u8) -> Result<(), StakexError> {
        if self.revision == u8::MAX {
            return Err(StakexError::InvalidRevision("can not increment revision".into()));
        }
        if revision != self.revision + 1 {
            return Err(StakexError::InvalidRevision(format!(
                "can only increment revision by one (current {})",
                self.revision
            )));
        }
        if revision > MAX_SUPPORTED_REVISION {
            return Err(StakexError::InvalidRevision(format!(
                "only revisions up to {MAX_SUPPORTED_REVISION} are supported"
            )));
        }
        match revision {
            // Revision 1 rebases both pay-share streams so they never carry
            // a negative rate left over from float drift.
            1 => {
                self.vote_pay.change_rate = self.vote_pay.change_rate.max(0.0);
                self.witness_pay.change_rate = self.witness_pay.change_rate.max(0.0);
            }
            _ => {}
        }
        self.revision = revision;
        Ok(())
    }
}

// ── Resource exchange ─────────────────────────────────────────────────────────

/// Singleton lending pool. `total_lendable == total_lent + total_unlent`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RexPool {
    pub total_lent: Asset,
    pub total_unlent: Asset,
    pub total_rent: Asset,
    pub total_lendable: Asset,
    pub total_rex: Asset,
    pub namebid_proceeds: Asset,
    pub loan_num: u64,
}

impl RexPool {
    pub fn empty(core: Symbol) -> Self {
        Self {
            total_lent: Asset::zero(core),
            total_unlent: Asset::zero(core),
            total_rent: Asset::zero(core),
            total_lendable: Asset::zero(core),
            total_rex: Asset::zero(REX_SYMBOL),
            namebid_proceeds: Asset::zero(core),
            loan_num: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RexFund {
    pub owner: AccountName,
    pub balance: Asset,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RexBalance {
    pub owner: AccountName,
    /// Token value of the holding last counted towards the owner's vote.
    pub vote_stake: Asset,
    pub rex_balance: Asset,
    pub maturities: MaturityBuckets,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RexLoan {
    pub kind: ResourceKind,
    pub loan_num: u64,
    pub from: AccountName,
    pub receiver: AccountName,
    /// Price of one renewal.
    pub payment: Asset,
    pub balance: Asset,
    pub total_staked: Asset,
    pub expiration: Timestamp,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RexOrder {
    pub owner: AccountName,
    pub rex_requested: Asset,
    pub proceeds: Asset,
    pub stake_change: Asset,
    pub order_time: Timestamp,
    pub is_open: bool,
}

// ── Producers and voters ──────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProducerInfo {
    pub owner: AccountName,
    pub total_votes: f64,
    pub producer_key: ProducerKey,
    pub is_active: bool,
    pub url: String,
    pub unpaid_blocks: u32,
    pub last_claim_time: Timestamp,
    pub location: u16,
}

impl ProducerInfo {
    pub fn deactivate(&mut self) {
        self.producer_key = ProducerKey::default();
        self.is_active = false;
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct VoterInfo {
    pub owner: AccountName,
    pub proxy: Option<AccountName>,
    /// Strictly increasing.
    pub producers: Vec<AccountName>,
    pub staked: i64,
    pub last_vote_weight: f64,
    /// Weight delegated to this account while it acts as a proxy.
    pub proxied_vote_weight: f64,
    pub is_proxy: bool,
    pub unpaid_votes: i64,
}

impl VoterInfo {
    pub fn new(owner: AccountName) -> Self {
        Self { owner, ..Default::default() }
    }
}

// ── Staking and RAM ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserResources {
    pub owner: AccountName,
    pub net_weight: Asset,
    pub cpu_weight: Asset,
    pub ram_bytes: i64,
}

impl UserResources {
    pub fn new(owner: AccountName, core: Symbol) -> Self {
        Self {
            owner,
            net_weight: Asset::zero(core),
            cpu_weight: Asset::zero(core),
            ram_bytes: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.net_weight.amount == 0 && self.cpu_weight.amount == 0 && self.ram_bytes == 0
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DelegatedBandwidth {
    pub from: AccountName,
    pub to: AccountName,
    pub net_weight: Asset,
    pub cpu_weight: Asset,
}

impl DelegatedBandwidth {
    pub fn is_empty(&self) -> bool {
        self.net_weight.amount == 0 && self.cpu_weight.amount == 0
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RefundRequest {
    pub owner: AccountName,
    pub request_time: Timestamp,
    pub net_amount: Asset,
    pub cpu_amount: Asset,
}

impl RefundRequest {
    pub fn is_empty(&self) -> bool {
        self.net_amount.amount == 0 && self.cpu_amount.amount == 0
    }
}

// ── Name auctions ─────────────────────────────────────────────────────────────

/// Open while `high_bid > 0`; a closed auction stores the winning bid negated.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NameBid {
    pub newname: AccountName,
    pub high_bidder: AccountName,
    pub high_bid: i64,
    pub last_bid_time: Timestamp,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BidRefund {
    pub bidder: AccountName,
    pub newname: AccountName,
    pub amount: Asset,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_steps_by_one() {
        let mut g = GlobalState::new(Symbol::constant("SYS", 4), 0);
        assert!(g.migrate_to(2).is_err());
        g.migrate_to(1).unwrap();
        assert_eq!(g.revision, 1);
        assert!(matches!(g.migrate_to(2), Err(StakexError::InvalidRevision(_))));
    }

    #[test]
    fn deactivate_clears_key() {
        let mut p = ProducerInfo {
            owner: AccountName::constant("bp"),
            total_votes: 10.0,
            producer_key: ProducerKey(vec![1, 2, 3]),
            is_active: true,
            url: String::new(),
            unpaid_blocks: 0,
            last_claim_time: 0,
            location: 0,
        };
        p.deactivate();
        assert!(!p.is_active);
        assert!(p.producer_key.is_empty());
        assert_eq!(p.total_votes, 10.0);
    }
}
