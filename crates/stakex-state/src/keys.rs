//! Table names and key encodings.
//!
//! Every multi-field key is a concatenation of fixed-width big-endian
//! fields, so sled's byte order equals the logical order of the index:
//!
//!   loans_by_expiry   kind | sortable(expiration) | loan_num
//!   loans_by_owner    kind | from | loan_num
//!   orders_by_time    sortable(open ? order_time : MAX) | owner
//!   producers_by_votes sortable(active ? -votes : votes) | owner
//!   name_bids_by_bid  (i64::MAX - high_bid) | newname

use stakex_core::{AccountName, ResourceKind, Timestamp};

pub const GLOBAL_KEY: &[u8] = b"global";
pub const REX_POOL_KEY: &[u8] = b"rexpool";
pub const RAM_MARKET_KEY: &[u8] = b"rammarket";
pub const CLOCK_KEY: &[u8] = b"clock";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Singletons,
    RexFunds,
    RexBalances,
    RexLoans,
    LoansByExpiry,
    LoansByOwner,
    RexOrders,
    OrdersByTime,
    Producers,
    ProducersByVotes,
    VotePayShares,
    WitnessPayShares,
    Voters,
    UserResources,
    Delegations,
    Refunds,
    NameBids,
    NameBidsByBid,
    BidRefunds,
}

impl Table {
    pub const ALL: [Table; 19] = [
        Table::Singletons,
        Table::RexFunds,
        Table::RexBalances,
        Table::RexLoans,
        Table::LoansByExpiry,
        Table::LoansByOwner,
        Table::RexOrders,
        Table::OrdersByTime,
        Table::Producers,
        Table::ProducersByVotes,
        Table::VotePayShares,
        Table::WitnessPayShares,
        Table::Voters,
        Table::UserResources,
        Table::Delegations,
        Table::Refunds,
        Table::NameBids,
        Table::NameBidsByBid,
        Table::BidRefunds,
    ];

    pub fn tree_name(&self) -> &'static str {
        match self {
            Table::Singletons => "singletons",
            Table::RexFunds => "rex_funds",
            Table::RexBalances => "rex_balances",
            Table::RexLoans => "rex_loans",
            Table::LoansByExpiry => "loans_by_expiry",
            Table::LoansByOwner => "loans_by_owner",
            Table::RexOrders => "rex_orders",
            Table::OrdersByTime => "orders_by_time",
            Table::Producers => "producers",
            Table::ProducersByVotes => "producers_by_votes",
            Table::VotePayShares => "vote_pay_shares",
            Table::WitnessPayShares => "witness_pay_shares",
            Table::Voters => "voters",
            Table::UserResources => "user_resources",
            Table::Delegations => "delegations",
            Table::Refunds => "refunds",
            Table::NameBids => "name_bids",
            Table::NameBidsByBid => "name_bids_by_bid",
            Table::BidRefunds => "bid_refunds",
        }
    }
}

// ── Sortable scalars ──────────────────────────────────────────────────────────

pub fn sortable_i64(v: i64) -> [u8; 8] {
    ((v as u64) ^ (1 << 63)).to_be_bytes()
}

/// Total order on finite floats; `-0.0` sorts just before `+0.0`.
pub fn sortable_f64(v: f64) -> [u8; 8] {
    let bits = v.to_bits();
    let mapped = if v.is_sign_negative() { !bits } else { bits | (1 << 63) };
    mapped.to_be_bytes()
}

// ── Composite keys ────────────────────────────────────────────────────────────

pub fn name_key(name: AccountName) -> Vec<u8> {
    name.to_be_bytes().to_vec()
}

pub fn pair_key(a: AccountName, b: AccountName) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&a.to_be_bytes());
    key.extend_from_slice(&b.to_be_bytes());
    key
}

pub fn loan_key(loan_num: u64) -> Vec<u8> {
    loan_num.to_be_bytes().to_vec()
}

pub fn loan_expiry_key(kind: ResourceKind, expiration: Timestamp, loan_num: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(17);
    key.push(kind.tag());
    key.extend_from_slice(&sortable_i64(expiration));
    key.extend_from_slice(&loan_num.to_be_bytes());
    key
}

pub fn loan_owner_prefix(kind: ResourceKind, owner: AccountName) -> Vec<u8> {
    let mut key = Vec::with_capacity(17);
    key.push(kind.tag());
    key.extend_from_slice(&owner.to_be_bytes());
    key
}

pub fn loan_owner_key(kind: ResourceKind, owner: AccountName, loan_num: u64) -> Vec<u8> {
    let mut key = loan_owner_prefix(kind, owner);
    key.extend_from_slice(&loan_num.to_be_bytes());
    key
}

/// Loan number stored in the last eight bytes of a loan index key.
pub fn loan_num_suffix(key: &[u8]) -> Option<u64> {
    let start = key.len().checked_sub(8)?;
    let bytes: [u8; 8] = key[start..].try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Closed orders sort after every open one.
pub fn order_time_key(is_open: bool, order_time: Timestamp, owner: AccountName) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    if is_open {
        key.extend_from_slice(&sortable_i64(order_time));
    } else {
        key.extend_from_slice(&[0xff; 8]);
    }
    key.extend_from_slice(&owner.to_be_bytes());
    key
}

/// Active producers first, highest votes first within each group.
pub fn producer_vote_key(is_active: bool, total_votes: f64, owner: AccountName) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    let ordering = if is_active { -total_votes } else { total_votes };
    key.extend_from_slice(&sortable_f64(ordering));
    key.extend_from_slice(&owner.to_be_bytes());
    key
}

/// Only open bids (`high_bid > 0`) are indexed.
pub fn bid_key(high_bid: i64, newname: AccountName) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&((i64::MAX - high_bid) as u64).to_be_bytes());
    key.extend_from_slice(&newname.to_be_bytes());
    key
}

/// Account name stored in the last eight bytes of an index key.
pub fn name_suffix(key: &[u8]) -> Option<AccountName> {
    let start = key.len().checked_sub(8)?;
    AccountName::from_be_slice(&key[start..])
}
