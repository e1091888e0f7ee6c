use crate::db::{StateDb, WriteSet};
use crate::keys::*;
use crate::records::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use stakex_core::{AccountName, ResourceKind, StakexError, Timestamp};
use stakex_econ::{ExchangeState, PayShare};
use std::collections::BTreeMap;

/// Copy-on-write view of the state for one action.
///
/// Reads fall through the pending write set to the committed database.
/// Nothing reaches sled until [`StagedState::commit`]; dropping the value
/// discards every write, which is how a failed action rolls back.
pub struct StagedState<'a> {
    db: &'a StateDb,
    writes: WriteSet,
}

impl<'a> StagedState<'a> {
    pub fn new(db: &'a StateDb) -> Self {
        Self { db, writes: WriteSet::new() }
    }

    pub fn commit(self) -> Result<(), StakexError> {
        self.db.apply(self.writes)
    }

    pub fn into_writes(self) -> WriteSet {
        self.writes
    }

    // ── Raw access ───────────────────────────────────────────────────────────

    fn get_raw(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StakexError> {
        if let Some(pending) = self.writes.get(&table).and_then(|t| t.get(key)) {
            return Ok(pending.clone());
        }
        self.db.get_raw(table, key)
    }

    fn put_raw(&mut self, table: Table, key: Vec<u8>, value: Vec<u8>) {
        self.writes.entry(table).or_default().insert(key, Some(value));
    }

    fn delete_raw(&mut self, table: Table, key: Vec<u8>) {
        self.writes.entry(table).or_default().insert(key, None);
    }

    fn get<T: DeserializeOwned>(&self, table: Table, key: &[u8]) -> Result<Option<T>, StakexError> {
        match self.get_raw(table, key)? {
            Some(bytes) => {
                let record = bincode::deserialize(&bytes)
                    .map_err(|e| StakexError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(&mut self, table: Table, key: Vec<u8>, record: &T) -> Result<(), StakexError> {
        let bytes = bincode::serialize(record).map_err(|e| StakexError::Serialization(e.to_string()))?;
        self.put_raw(table, key, bytes);
        Ok(())
    }

    /// First `limit` live keys under `prefix`, merging pending writes over
    /// committed entries.
    fn scan_keys(&self, table: Table, prefix: &[u8], limit: usize) -> Result<Vec<Vec<u8>>, StakexError> {
        let pending: Vec<(&Vec<u8>, &Option<Vec<u8>>)> = self
            .writes
            .get(&table)
            .map(|t| t.range(prefix.to_vec()..).take_while(|(k, _)| k.starts_with(prefix)).collect())
            .unwrap_or_default();

        // Each pending entry can hide at most one committed entry.
        let committed = self.db.scan_raw(table, prefix, limit.saturating_add(pending.len()))?;
        let mut merged: BTreeMap<Vec<u8>, ()> = committed.into_iter().map(|(k, _)| (k, ())).collect();
        for (key, value) in pending {
            match value {
                Some(_) => merged.insert(key.clone(), ()),
                None => merged.remove(key),
            };
        }
        Ok(merged.into_keys().take(limit).collect())
    }

    // ── Singletons ───────────────────────────────────────────────────────────

    pub fn global(&self) -> Result<Option<GlobalState>, StakexError> {
        self.get(Table::Singletons, GLOBAL_KEY)
    }

    pub fn put_global(&mut self, global: &GlobalState) -> Result<(), StakexError> {
        self.put(Table::Singletons, GLOBAL_KEY.to_vec(), global)
    }

    pub fn clock(&self) -> Result<Option<Timestamp>, StakexError> {
        self.get(Table::Singletons, CLOCK_KEY)
    }

    pub fn set_clock(&mut self, now: Timestamp) -> Result<(), StakexError> {
        self.put(Table::Singletons, CLOCK_KEY.to_vec(), &now)
    }

    pub fn ram_market(&self) -> Result<Option<ExchangeState>, StakexError> {
        self.get(Table::Singletons, RAM_MARKET_KEY)
    }

    pub fn put_ram_market(&mut self, market: &ExchangeState) -> Result<(), StakexError> {
        self.put(Table::Singletons, RAM_MARKET_KEY.to_vec(), market)
    }

    pub fn rex_pool(&self) -> Result<Option<RexPool>, StakexError> {
        self.get(Table::Singletons, REX_POOL_KEY)
    }

    pub fn put_rex_pool(&mut self, pool: &RexPool) -> Result<(), StakexError> {
        self.put(Table::Singletons, REX_POOL_KEY.to_vec(), pool)
    }

    // ── REX funds and balances ───────────────────────────────────────────────

    pub fn rex_fund(&self, owner: AccountName) -> Result<Option<RexFund>, StakexError> {
        self.get(Table::RexFunds, &name_key(owner))
    }

    pub fn put_rex_fund(&mut self, fund: &RexFund) -> Result<(), StakexError> {
        self.put(Table::RexFunds, name_key(fund.owner), fund)
    }

    pub fn remove_rex_fund(&mut self, owner: AccountName) {
        self.delete_raw(Table::RexFunds, name_key(owner));
    }

    pub fn rex_balance(&self, owner: AccountName) -> Result<Option<RexBalance>, StakexError> {
        self.get(Table::RexBalances, &name_key(owner))
    }

    pub fn put_rex_balance(&mut self, balance: &RexBalance) -> Result<(), StakexError> {
        self.put(Table::RexBalances, name_key(balance.owner), balance)
    }

    pub fn remove_rex_balance(&mut self, owner: AccountName) {
        self.delete_raw(Table::RexBalances, name_key(owner));
    }

    // ── Loans ────────────────────────────────────────────────────────────────

    pub fn rex_loan(&self, loan_num: u64) -> Result<Option<RexLoan>, StakexError> {
        self.get(Table::RexLoans, &loan_key(loan_num))
    }

    pub fn put_rex_loan(&mut self, loan: &RexLoan) -> Result<(), StakexError> {
        if let Some(old) = self.rex_loan(loan.loan_num)? {
            self.unindex_loan(&old);
        }
        self.put_raw(
            Table::LoansByExpiry,
            loan_expiry_key(loan.kind, loan.expiration, loan.loan_num),
            Vec::new(),
        );
        self.put_raw(Table::LoansByOwner, loan_owner_key(loan.kind, loan.from, loan.loan_num), Vec::new());
        self.put(Table::RexLoans, loan_key(loan.loan_num), loan)
    }

    pub fn remove_rex_loan(&mut self, loan_num: u64) -> Result<(), StakexError> {
        if let Some(old) = self.rex_loan(loan_num)? {
            self.unindex_loan(&old);
            self.delete_raw(Table::RexLoans, loan_key(loan_num));
        }
        Ok(())
    }

    fn unindex_loan(&mut self, loan: &RexLoan) {
        self.delete_raw(Table::LoansByExpiry, loan_expiry_key(loan.kind, loan.expiration, loan.loan_num));
        self.delete_raw(Table::LoansByOwner, loan_owner_key(loan.kind, loan.from, loan.loan_num));
    }

    fn loans_by_index(&self, table: Table, prefix: &[u8], limit: usize) -> Result<Vec<RexLoan>, StakexError> {
        let mut loans = Vec::new();
        for key in self.scan_keys(table, prefix, limit)? {
            let loan_num = loan_num_suffix(&key)
                .ok_or_else(|| StakexError::StateInconsistency("malformed loan index key".into()))?;
            let loan = self
                .rex_loan(loan_num)?
                .ok_or_else(|| StakexError::missing("indexed loan"))?;
            loans.push(loan);
        }
        Ok(loans)
    }

    /// Loans of one kind, earliest expiration first.
    pub fn loans_by_expiry(&self, kind: ResourceKind, limit: usize) -> Result<Vec<RexLoan>, StakexError> {
        self.loans_by_index(Table::LoansByExpiry, &[kind.tag()], limit)
    }

    pub fn earliest_loan(&self, kind: ResourceKind) -> Result<Option<RexLoan>, StakexError> {
        Ok(self.loans_by_expiry(kind, 1)?.into_iter().next())
    }

    pub fn loans_of(&self, kind: ResourceKind, owner: AccountName) -> Result<Vec<RexLoan>, StakexError> {
        self.loans_by_index(Table::LoansByOwner, &loan_owner_prefix(kind, owner), usize::MAX)
    }

    // ── Sell orders ──────────────────────────────────────────────────────────

    pub fn rex_order(&self, owner: AccountName) -> Result<Option<RexOrder>, StakexError> {
        self.get(Table::RexOrders, &name_key(owner))
    }

    pub fn put_rex_order(&mut self, order: &RexOrder) -> Result<(), StakexError> {
        if let Some(old) = self.rex_order(order.owner)? {
            self.delete_raw(Table::OrdersByTime, order_time_key(old.is_open, old.order_time, old.owner));
        }
        self.put_raw(
            Table::OrdersByTime,
            order_time_key(order.is_open, order.order_time, order.owner),
            Vec::new(),
        );
        self.put(Table::RexOrders, name_key(order.owner), order)
    }

    pub fn remove_rex_order(&mut self, owner: AccountName) -> Result<(), StakexError> {
        if let Some(old) = self.rex_order(owner)? {
            self.delete_raw(Table::OrdersByTime, order_time_key(old.is_open, old.order_time, old.owner));
            self.delete_raw(Table::RexOrders, name_key(owner));
        }
        Ok(())
    }

    /// Orders oldest first, open orders before closed ones.
    pub fn orders_by_time(&self, limit: usize) -> Result<Vec<RexOrder>, StakexError> {
        let mut orders = Vec::new();
        for key in self.scan_keys(Table::OrdersByTime, &[], limit)? {
            let owner = name_suffix(&key)
                .ok_or_else(|| StakexError::StateInconsistency("malformed order index key".into()))?;
            orders.push(self.rex_order(owner)?.ok_or_else(|| StakexError::missing("indexed order"))?);
        }
        Ok(orders)
    }

    pub fn has_open_orders(&self) -> Result<bool, StakexError> {
        Ok(self.orders_by_time(1)?.first().is_some_and(|o| o.is_open))
    }

    // ── Producers ────────────────────────────────────────────────────────────

    pub fn producer(&self, owner: AccountName) -> Result<Option<ProducerInfo>, StakexError> {
        self.get(Table::Producers, &name_key(owner))
    }

    pub fn put_producer(&mut self, producer: &ProducerInfo) -> Result<(), StakexError> {
        if let Some(old) = self.producer(producer.owner)? {
            self.delete_raw(
                Table::ProducersByVotes,
                producer_vote_key(old.is_active, old.total_votes, old.owner),
            );
        }
        self.put_raw(
            Table::ProducersByVotes,
            producer_vote_key(producer.is_active, producer.total_votes, producer.owner),
            Vec::new(),
        );
        self.put(Table::Producers, name_key(producer.owner), producer)
    }

    /// Active producers by descending votes, then inactive ones.
    pub fn producers_by_votes(&self, limit: usize) -> Result<Vec<ProducerInfo>, StakexError> {
        let mut producers = Vec::new();
        for key in self.scan_keys(Table::ProducersByVotes, &[], limit)? {
            let owner = name_suffix(&key)
                .ok_or_else(|| StakexError::StateInconsistency("malformed producer index key".into()))?;
            producers.push(self.producer(owner)?.ok_or_else(|| StakexError::missing("indexed producer"))?);
        }
        Ok(producers)
    }

    pub fn vote_pay_share(&self, owner: AccountName) -> Result<Option<PayShare>, StakexError> {
        self.get(Table::VotePayShares, &name_key(owner))
    }

    pub fn put_vote_pay_share(&mut self, owner: AccountName, share: &PayShare) -> Result<(), StakexError> {
        self.put(Table::VotePayShares, name_key(owner), share)
    }

    pub fn witness_pay_share(&self, owner: AccountName) -> Result<Option<PayShare>, StakexError> {
        self.get(Table::WitnessPayShares, &name_key(owner))
    }

    pub fn put_witness_pay_share(&mut self, owner: AccountName, share: &PayShare) -> Result<(), StakexError> {
        self.put(Table::WitnessPayShares, name_key(owner), share)
    }

    // ── Voters ───────────────────────────────────────────────────────────────

    pub fn voter(&self, owner: AccountName) -> Result<Option<VoterInfo>, StakexError> {
        self.get(Table::Voters, &name_key(owner))
    }

    pub fn put_voter(&mut self, voter: &VoterInfo) -> Result<(), StakexError> {
        self.put(Table::Voters, name_key(voter.owner), voter)
    }

    // ── Staking and RAM ──────────────────────────────────────────────────────

    pub fn user_resources(&self, owner: AccountName) -> Result<Option<UserResources>, StakexError> {
        self.get(Table::UserResources, &name_key(owner))
    }

    /// Stores the row, or deletes it once every field is zero.
    pub fn put_user_resources(&mut self, res: &UserResources) -> Result<(), StakexError> {
        if res.is_empty() {
            self.delete_raw(Table::UserResources, name_key(res.owner));
            Ok(())
        } else {
            self.put(Table::UserResources, name_key(res.owner), res)
        }
    }

    pub fn delegation(&self, from: AccountName, to: AccountName) -> Result<Option<DelegatedBandwidth>, StakexError> {
        self.get(Table::Delegations, &pair_key(from, to))
    }

    /// Stores the row, or deletes it once both weights are zero.
    pub fn put_delegation(&mut self, del: &DelegatedBandwidth) -> Result<(), StakexError> {
        if del.is_empty() {
            self.delete_raw(Table::Delegations, pair_key(del.from, del.to));
            Ok(())
        } else {
            self.put(Table::Delegations, pair_key(del.from, del.to), del)
        }
    }

    pub fn refund_request(&self, owner: AccountName) -> Result<Option<RefundRequest>, StakexError> {
        self.get(Table::Refunds, &name_key(owner))
    }

    pub fn put_refund_request(&mut self, req: &RefundRequest) -> Result<(), StakexError> {
        self.put(Table::Refunds, name_key(req.owner), req)
    }

    pub fn remove_refund_request(&mut self, owner: AccountName) {
        self.delete_raw(Table::Refunds, name_key(owner));
    }

    // ── Name auctions ────────────────────────────────────────────────────────

    pub fn name_bid(&self, newname: AccountName) -> Result<Option<NameBid>, StakexError> {
        self.get(Table::NameBids, &name_key(newname))
    }

    pub fn put_name_bid(&mut self, bid: &NameBid) -> Result<(), StakexError> {
        if let Some(old) = self.name_bid(bid.newname)? {
            if old.high_bid > 0 {
                self.delete_raw(Table::NameBidsByBid, bid_key(old.high_bid, old.newname));
            }
        }
        if bid.high_bid > 0 {
            self.put_raw(Table::NameBidsByBid, bid_key(bid.high_bid, bid.newname), Vec::new());
        }
        self.put(Table::NameBids, name_key(bid.newname), bid)
    }

    /// Open auctions, highest bid first.
    pub fn open_bids(&self, limit: usize) -> Result<Vec<NameBid>, StakexError> {
        let mut bids = Vec::new();
        for key in self.scan_keys(Table::NameBidsByBid, &[], limit)? {
            let name = name_suffix(&key)
                .ok_or_else(|| StakexError::StateInconsistency("malformed bid index key".into()))?;
            bids.push(self.name_bid(name)?.ok_or_else(|| StakexError::missing("indexed name bid"))?);
        }
        Ok(bids)
    }

    pub fn bid_refund(&self, newname: AccountName, bidder: AccountName) -> Result<Option<BidRefund>, StakexError> {
        self.get(Table::BidRefunds, &pair_key(newname, bidder))
    }

    pub fn put_bid_refund(&mut self, refund: &BidRefund) -> Result<(), StakexError> {
        self.put(Table::BidRefunds, pair_key(refund.newname, refund.bidder), refund)
    }

    pub fn remove_bid_refund(&mut self, newname: AccountName, bidder: AccountName) {
        self.delete_raw(Table::BidRefunds, pair_key(newname, bidder));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stakex_core::{Asset, ProducerKey, Symbol};

    const SYS: Symbol = Symbol::constant("SYS", 4);

    fn temp_db(name: &str) -> StateDb {
        let dir = std::env::temp_dir().join(format!("stakex_staged_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        StateDb::open(&dir).expect("open temp db")
    }

    fn producer(name: &str, votes: f64, active: bool) -> ProducerInfo {
        ProducerInfo {
            owner: AccountName::constant(name),
            total_votes: votes,
            producer_key: ProducerKey(vec![1]),
            is_active: active,
            url: String::new(),
            unpaid_blocks: 0,
            last_claim_time: 0,
            location: 0,
        }
    }

    fn loan(num: u64, kind: ResourceKind, from: &str, expiration: Timestamp) -> RexLoan {
        RexLoan {
            kind,
            loan_num: num,
            from: AccountName::constant(from),
            receiver: AccountName::constant(from),
            payment: Asset::new(1, SYS),
            balance: Asset::zero(SYS),
            total_staked: Asset::new(10, SYS),
            expiration,
        }
    }

    #[test]
    fn dropped_stage_leaves_db_untouched() {
        let db = temp_db("rollback");
        {
            let mut staged = StagedState::new(&db);
            staged.put_voter(&VoterInfo::new(AccountName::constant("alice"))).unwrap();
            assert!(staged.voter(AccountName::constant("alice")).unwrap().is_some());
        }
        let staged = StagedState::new(&db);
        assert!(staged.voter(AccountName::constant("alice")).unwrap().is_none());
    }

    #[test]
    fn producer_index_follows_vote_changes() {
        let db = temp_db("producers");
        let mut staged = StagedState::new(&db);
        staged.put_producer(&producer("a", 10.0, true)).unwrap();
        staged.put_producer(&producer("b", 20.0, true)).unwrap();
        staged.put_producer(&producer("c", 99.0, false)).unwrap();
        staged.commit().unwrap();

        let mut staged = StagedState::new(&db);
        staged.put_producer(&producer("a", 30.0, true)).unwrap();
        let order: Vec<String> = staged
            .producers_by_votes(10)
            .unwrap()
            .iter()
            .map(|p| p.owner.to_string())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn loan_index_merges_pending_and_committed() {
        let db = temp_db("loans");
        let mut staged = StagedState::new(&db);
        staged.put_rex_loan(&loan(1, ResourceKind::Cpu, "alice", 500)).unwrap();
        staged.put_rex_loan(&loan(2, ResourceKind::Cpu, "bob", 100)).unwrap();
        staged.put_rex_loan(&loan(3, ResourceKind::Net, "alice", 50)).unwrap();
        staged.commit().unwrap();

        let mut staged = StagedState::new(&db);
        assert_eq!(staged.earliest_loan(ResourceKind::Cpu).unwrap().unwrap().loan_num, 2);
        staged.remove_rex_loan(2).unwrap();
        assert_eq!(staged.earliest_loan(ResourceKind::Cpu).unwrap().unwrap().loan_num, 1);

        let mut renewed = loan(1, ResourceKind::Cpu, "alice", 1_000);
        renewed.balance = Asset::new(5, SYS);
        staged.put_rex_loan(&renewed).unwrap();
        staged.put_rex_loan(&loan(4, ResourceKind::Cpu, "carol", 700)).unwrap();
        let nums: Vec<u64> = staged
            .loans_by_expiry(ResourceKind::Cpu, 10)
            .unwrap()
            .iter()
            .map(|l| l.loan_num)
            .collect();
        assert_eq!(nums, vec![4, 1]);
        assert_eq!(staged.loans_of(ResourceKind::Cpu, AccountName::constant("alice")).unwrap().len(), 1);
        assert_eq!(staged.loans_of(ResourceKind::Net, AccountName::constant("alice")).unwrap().len(), 1);
    }

    #[test]
    fn closed_orders_leave_the_open_queue() {
        let db = temp_db("orders");
        let mut staged = StagedState::new(&db);
        let mut order = RexOrder {
            owner: AccountName::constant("alice"),
            rex_requested: Asset::new(10, stakex_core::constants::REX_SYMBOL),
            proceeds: Asset::zero(SYS),
            stake_change: Asset::zero(SYS),
            order_time: 10,
            is_open: true,
        };
        staged.put_rex_order(&order).unwrap();
        assert!(staged.has_open_orders().unwrap());
        order.is_open = false;
        staged.put_rex_order(&order).unwrap();
        assert!(!staged.has_open_orders().unwrap());
        assert_eq!(staged.orders_by_time(10).unwrap().len(), 1);
    }

    #[test]
    fn closed_auctions_are_not_indexed() {
        let db = temp_db("bids");
        let mut staged = StagedState::new(&db);
        let mut bid = NameBid {
            newname: AccountName::constant("short"),
            high_bidder: AccountName::constant("alice"),
            high_bid: 100,
            last_bid_time: 0,
        };
        staged.put_name_bid(&bid).unwrap();
        assert_eq!(staged.open_bids(1).unwrap().len(), 1);
        bid.high_bid = -100;
        staged.put_name_bid(&bid).unwrap();
        assert!(staged.open_bids(1).unwrap().is_empty());
    }

    #[test]
    fn empty_rows_are_deleted() {
        let db = temp_db("empty_rows");
        let mut staged = StagedState::new(&db);
        let owner = AccountName::constant("alice");
        let mut res = UserResources::new(owner, SYS);
        res.ram_bytes = 10;
        staged.put_user_resources(&res).unwrap();
        assert!(staged.user_resources(owner).unwrap().is_some());
        res.ram_bytes = 0;
        staged.put_user_resources(&res).unwrap();
        assert!(staged.user_resources(owner).unwrap().is_none());
    }
}
