use std::sync::Arc;

use stakex_core::constants::{REX_SYMBOL, SECONDS_PER_DAY};
use stakex_core::{
    AccountName, Action, ActionEvent, Asset, ProducerKey, ResourceKind, SignedAction, StakexError, Symbol,
    SystemParams, Timestamp,
};
use stakex_econ::maturity_date;
use stakex_state::db::WriteSet;
use stakex_state::keys::{name_key, Table};
use stakex_state::{MemoryLedger, Settlement, StateDb, SystemEngine, TokenService};

const SYS: Symbol = Symbol::constant("SYS", 4);
const T0: Timestamp = 1_700_000_000;
const DAY: i64 = SECONDS_PER_DAY;

fn n(s: &str) -> AccountName {
    s.parse().unwrap()
}

fn sys(units: i64) -> Asset {
    Asset::new(units, SYS)
}

fn rex(units: i64) -> Asset {
    Asset::new(units, REX_SYMBOL)
}

fn test_params() -> SystemParams {
    SystemParams {
        max_vote_power: i64::MAX / 4,
        min_activated_stake: 1_000_0000,
        min_producer_stake: 10_0000,
        min_producers_for_rex: 1,
        rex_init_total_rent: 10_0000,
        ..SystemParams::default()
    }
}

/// Network buckets funded by `new_tokens` of inflation: (blocks, votes, witnesses).
fn network_split(new_tokens: i64) -> (i64, i64, i64) {
    let split = test_params().inflation;
    let part = |amount: i64, fraction: f64| (amount as f64 * fraction) as i64;
    let network = part(new_tokens, split.network);
    let blocks = part(network, split.per_block);
    let witnesses = part(network, split.per_witness);
    (blocks, network - blocks - witnesses, witnesses)
}

struct Chain {
    engine: SystemEngine,
    ledger: MemoryLedger,
    now: Timestamp,
}

impl Chain {
    fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("stakex_scenario_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        let db = Arc::new(StateDb::open(&dir).expect("open temp db"));
        let engine = SystemEngine::new(db, test_params());

        let mut ledger = MemoryLedger::default();
        ledger.create(SYS).unwrap();
        let mut seed = vec![Settlement::Issue { to: n("stx"), quantity: sys(10_000_000_0000), memo: "genesis".into() }];
        for who in ["alice", "bob", "carol", "dave", "bp1"] {
            seed.push(Settlement::Transfer { from: n("stx"), to: n(who), quantity: sys(100_000_0000), memo: "seed".into() });
        }
        ledger.settle(&seed).unwrap();

        let mut chain = Self { engine, ledger, now: T0 };
        chain.ok(Action::Init { core_symbol: SYS });
        chain
    }

    fn apply(&mut self, action: Action) -> Result<Vec<ActionEvent>, StakexError> {
        self.engine.apply(&SignedAction::by_required(action), &mut self.ledger, self.now)
    }

    fn ok(&mut self, action: Action) -> Vec<ActionEvent> {
        let label = action.name();
        self.apply(action).unwrap_or_else(|e| panic!("{label} failed: {e}"))
    }

    fn advance(&mut self, secs: i64) {
        self.now += secs;
    }

    fn balance(&self, who: &str) -> i64 {
        self.ledger.balance(n(who), SYS).unwrap().amount
    }

    fn stake(&mut self, who: &str, net: i64, cpu: i64) {
        self.ok(Action::DelegateBw {
            from: n(who),
            receiver: n(who),
            stake_net_quantity: sys(net),
            stake_cpu_quantity: sys(cpu),
            transfer: false,
        });
    }

    fn vote(&mut self, who: &str, producers: &[&str]) {
        self.ok(Action::VoteProducer {
            voter: n(who),
            proxy: None,
            producers: producers.iter().map(|p| n(p)).collect(),
        });
    }

    /// `bp1` registered, `alice` staked `alice_stake` and voting for it.
    fn with_producer(name: &str, alice_stake: i64) -> Self {
        let mut chain = Self::new(name);
        chain.stake("bp1", 50_0000, 50_0000);
        chain.ok(Action::RegProducer {
            producer: n("bp1"),
            producer_key: ProducerKey(vec![7; 33]),
            url: "https://bp1.example".into(),
            location: 0,
        });
        chain.stake("alice", alice_stake / 2, alice_stake - alice_stake / 2);
        chain.vote("alice", &["bp1"]);
        chain
    }

    fn register(&mut self, producer: &str) {
        self.ok(Action::RegProducer {
            producer: n(producer),
            producer_key: ProducerKey(vec![9; 33]),
            url: String::new(),
            location: 0,
        });
    }

    fn supply(&self) -> i64 {
        self.ledger.supplies[&SYS]
    }

    fn buy_rex(&mut self, who: &str, amount: i64) -> Vec<ActionEvent> {
        self.ok(Action::Deposit { owner: n(who), amount: sys(amount) });
        self.ok(Action::BuyRex { from: n(who), amount: sys(amount) })
    }

    fn assert_conserved(&self, holders: &[&str]) {
        let held: i64 = self.ledger.balances.values().filter_map(|b| b.get(&SYS)).sum();
        assert_eq!(held, self.ledger.supplies[&SYS], "token supply not conserved");

        let state = self.engine.reader();
        let Some(pool) = state.rex_pool().unwrap() else { return };
        assert_eq!(pool.total_lendable.amount, pool.total_lent.amount + pool.total_unlent.amount);
        let funds: i64 = holders
            .iter()
            .filter_map(|h| state.rex_fund(n(h)).unwrap())
            .map(|f| f.balance.amount)
            .sum();
        let loans: i64 = [ResourceKind::Cpu, ResourceKind::Net]
            .iter()
            .flat_map(|k| state.loans_by_expiry(*k, usize::MAX).unwrap())
            .map(|l| l.balance.amount)
            .sum();
        assert_eq!(self.balance("stx.rex"), funds + pool.total_lendable.amount + loans);
    }
}

#[test]
fn vote_weight_follows_stake_changes() {
    let mut chain = Chain::with_producer("vote_weight", 1_000_0000);
    let producer = chain.engine.reader().producer(n("bp1")).unwrap().unwrap();
    assert_eq!(producer.total_votes, 1_000_0000.0);

    chain.stake("alice", 250_0000, 250_0000);
    chain.vote("alice", &["bp1"]);

    let state = chain.engine.reader();
    let producer = state.producer(n("bp1")).unwrap().unwrap();
    let global = state.global().unwrap().unwrap();
    assert_eq!(producer.total_votes, 1_500_0000.0);
    assert_eq!(global.total_producer_vote_weight, 1_500_0000.0);
    assert_eq!(state.voter(n("alice")).unwrap().unwrap().last_vote_weight, 1_500_0000.0);
}

#[test]
fn proxy_forwards_weight() {
    let mut chain = Chain::with_producer("proxy", 1_000_0000);
    chain.stake("bob", 200_0000, 0);
    chain.ok(Action::RegProxy { proxy: n("bob"), isproxy: true });
    chain.vote("bob", &["bp1"]);
    chain.stake("carol", 300_0000, 0);
    chain.ok(Action::VoteProducer { voter: n("carol"), proxy: Some(n("bob")), producers: vec![] });

    let state = chain.engine.reader();
    assert_eq!(state.producer(n("bp1")).unwrap().unwrap().total_votes, 1_500_0000.0);
    assert_eq!(state.voter(n("bob")).unwrap().unwrap().proxied_vote_weight, 300_0000.0);

    let err = chain
        .apply(Action::VoteProducer { voter: n("dave"), proxy: Some(n("dave")), producers: vec![] })
        .unwrap_err();
    assert!(matches!(err, StakexError::ProxyToSelf));
    assert!(matches!(
        chain.apply(Action::RegProxy { proxy: n("bob"), isproxy: true }),
        Err(StakexError::NoEffect)
    ));
}

#[test]
fn voting_rejects_unsorted_and_unknown_producers() {
    let mut chain = Chain::with_producer("vote_errors", 10_0000);
    chain.stake("bob", 10_0000, 0);
    let err = chain
        .apply(Action::VoteProducer { voter: n("bob"), proxy: None, producers: vec![n("bp1"), n("bp1")] })
        .unwrap_err();
    assert!(matches!(err, StakexError::ProducersNotSorted));
    let err = chain
        .apply(Action::VoteProducer { voter: n("bob"), proxy: None, producers: vec![n("nobody")] })
        .unwrap_err();
    assert!(matches!(err, StakexError::ProducerNotRegistered(_)));
    assert!(matches!(
        chain.apply(Action::VoteProducer { voter: n("bp1"), proxy: None, producers: vec![] }),
        Err(StakexError::ProducersCannotVote)
    ));
}

#[test]
fn rex_shares_bootstrap_one_to_one() {
    let mut chain = Chain::with_producer("rex_bootstrap", 10_0000);
    let events = chain.buy_rex("alice", 100_0000);
    assert_eq!(events, vec![ActionEvent::BuyResult { rex_received: rex(100_0000) }]);

    chain.stake("bob", 10_0000, 0);
    chain.vote("bob", &["bp1"]);
    let events = chain.buy_rex("bob", 50_0000);
    assert_eq!(events, vec![ActionEvent::BuyResult { rex_received: rex(50_0000) }]);

    let state = chain.engine.reader();
    let pool = state.rex_pool().unwrap().unwrap();
    assert_eq!(pool.total_rex, rex(150_0000));
    assert_eq!(pool.total_lendable, sys(150_0000));
    assert_eq!(state.rex_balance(n("bob")).unwrap().unwrap().vote_stake, sys(50_0000));
    chain.assert_conserved(&["alice", "bob"]);
}

#[test]
fn buying_rex_requires_votes() {
    let mut chain = Chain::with_producer("rex_voting", 10_0000);
    chain.ok(Action::Deposit { owner: n("bob"), amount: sys(10_0000) });
    assert!(matches!(
        chain.apply(Action::BuyRex { from: n("bob"), amount: sys(10_0000) }),
        Err(StakexError::VotingRequirementNotMet)
    ));
}

fn chain_with_loan(name: &str) -> Chain {
    let mut chain = Chain::with_producer(name, 10_0000);
    chain.buy_rex("alice", 1_000_0000);
    chain.ok(Action::Deposit { owner: n("carol"), amount: sys(10_0000) });
    let events = chain.ok(Action::RentCpu {
        from: n("carol"),
        receiver: n("carol"),
        loan_payment: sys(1_0000),
        loan_fund: sys(0),
    });
    assert_eq!(events, vec![ActionEvent::RentResult { loan_num: 1, rented_tokens: sys(909_090) }]);
    chain
}

#[test]
fn unfunded_loan_expires_and_releases_stake() {
    let mut chain = chain_with_loan("loan_expiry");
    let res = chain.engine.reader().user_resources(n("carol")).unwrap().unwrap();
    assert_eq!(res.cpu_weight, sys(909_090));

    chain.advance(31 * DAY);
    chain.ok(Action::RexExec { user: n("carol"), max: 2 });

    let state = chain.engine.reader();
    assert!(state.rex_loan(1).unwrap().is_none());
    assert!(state.user_resources(n("carol")).unwrap().is_none());
    let pool = state.rex_pool().unwrap().unwrap();
    assert_eq!(pool.total_lent, sys(0));
    assert_eq!(pool.total_unlent, pool.total_lendable);
    assert_eq!(state.rex_fund(n("carol")).unwrap().unwrap().balance, sys(9_0000));
    chain.assert_conserved(&["alice", "carol"]);
}

#[test]
fn funded_loan_renews() {
    let mut chain = chain_with_loan("loan_renew");
    chain.ok(Action::FundCpuLoan { from: n("carol"), loan_num: 1, payment: sys(2_0000) });
    assert!(matches!(
        chain.apply(Action::DefundCpuLoan { from: n("carol"), loan_num: 1, amount: sys(1_5000) }),
        Err(StakexError::LoanUnderfunded { .. })
    ));
    assert!(matches!(
        chain.apply(Action::FundCpuLoan { from: n("bob"), loan_num: 1, payment: sys(1) }),
        Err(StakexError::NotLoanOwner)
    ));

    chain.advance(31 * DAY);
    chain.ok(Action::RexExec { user: n("carol"), max: 2 });

    let loan = chain.engine.reader().rex_loan(1).unwrap().unwrap();
    assert_eq!(loan.balance, sys(1_0000));
    assert_eq!(loan.expiration, T0 + 60 * DAY);
    chain.assert_conserved(&["alice", "carol"]);
}

#[test]
fn rexexec_with_zero_max_is_a_noop() {
    let mut chain = chain_with_loan("rexexec_zero");
    chain.advance(31 * DAY);
    let pool_before = chain.engine.reader().rex_pool().unwrap();

    chain.ok(Action::RexExec { user: n("carol"), max: 0 });

    let state = chain.engine.reader();
    assert!(state.rex_loan(1).unwrap().is_some());
    assert_eq!(state.rex_pool().unwrap(), pool_before);
}

#[test]
fn queued_sell_order_blocks_loans_until_filled() {
    let mut chain = Chain::with_producer("sell_queue", 10_0000);
    chain.buy_rex("alice", 100_0000);
    chain.ok(Action::Deposit { owner: n("carol"), amount: sys(20_0000) });
    chain.ok(Action::RentCpu {
        from: n("carol"),
        receiver: n("carol"),
        loan_payment: sys(10_0000),
        loan_fund: sys(0),
    });

    chain.advance(6 * DAY);
    let events = chain.ok(Action::SellRex { from: n("alice"), rex: rex(100_0000) });
    assert!(events.is_empty());
    let order = chain.engine.reader().rex_order(n("alice")).unwrap().unwrap();
    assert!(order.is_open);

    chain.ok(Action::Deposit { owner: n("dave"), amount: sys(5_0000) });
    assert!(matches!(
        chain.apply(Action::RentNet {
            from: n("dave"),
            receiver: n("dave"),
            loan_payment: sys(1_0000),
            loan_fund: sys(0),
        }),
        Err(StakexError::RentalUnavailable(_))
    ));

    chain.advance(25 * DAY);
    let events = chain.ok(Action::RexExec { user: n("carol"), max: 2 });
    assert_eq!(events, vec![ActionEvent::OrderResult { owner: n("alice"), proceeds: sys(110_0000) }]);
    assert!(matches!(
        chain.apply(Action::CnclRexOrder { owner: n("alice") }),
        Err(StakexError::OrderAlreadyFilled)
    ));

    let before = chain.balance("alice");
    chain.ok(Action::Withdraw { owner: n("alice"), amount: sys(110_0000) });
    assert_eq!(chain.balance("alice"), before + 110_0000);
    assert!(chain.engine.reader().rex_order(n("alice")).unwrap().is_none());
    chain.assert_conserved(&["alice", "carol", "dave"]);
}

#[test]
fn immature_shares_cannot_be_sold() {
    let mut chain = Chain::with_producer("immature", 10_0000);
    chain.buy_rex("alice", 100_0000);
    assert!(matches!(
        chain.apply(Action::SellRex { from: n("alice"), rex: rex(1_0000) }),
        Err(StakexError::InsufficientMaturedShares { .. })
    ));

    chain.advance(6 * DAY);
    let events = chain.ok(Action::SellRex { from: n("alice"), rex: rex(40_0000) });
    assert_eq!(events, vec![ActionEvent::SellResult { proceeds: sys(40_0000) }]);
    assert_eq!(chain.engine.reader().rex_fund(n("alice")).unwrap().unwrap().balance, sys(40_0000));

    chain.ok(Action::MvToSavings { owner: n("alice"), rex: rex(60_0000) });
    assert!(matches!(
        chain.apply(Action::SellRex { from: n("alice"), rex: rex(1_0000) }),
        Err(StakexError::InsufficientMaturedShares { .. })
    ));
    assert!(matches!(
        chain.apply(Action::CloseRex { owner: n("alice") }),
        Err(StakexError::RemainingRexBalance)
    ));
    chain.assert_conserved(&["alice"]);
}

#[test]
fn producer_claims_every_bucket() {
    let mut chain = Chain::with_producer("claim", 1_000_0000);
    for _ in 0..3 {
        chain.ok(Action::OnBlock { producer: n("bp1") });
    }
    let supply_before = chain.ledger.supplies[&SYS];
    let bp_before = chain.balance("bp1");

    chain.advance(2 * DAY);
    chain.ok(Action::ClaimRewards { owner: n("bp1") });

    assert!(chain.ledger.supplies[&SYS] > supply_before);
    assert!(chain.balance("bp1") > bp_before);
    let global = chain.engine.reader().global().unwrap().unwrap();
    assert_eq!(global.total_unpaid_blocks, 0);
    assert_eq!(chain.balance("stx.bpay"), global.perblock_bucket);
    assert_eq!(chain.balance("stx.vpay"), global.pervote_bucket);
    assert_eq!(chain.balance("stx.wpay"), global.perwitness_bucket);
    assert!(global.perblock_bucket <= 1 && global.pervote_bucket <= 1);
    assert!(global.perwitness_bucket <= 1);

    chain.advance(DAY / 2);
    assert!(matches!(chain.apply(Action::ClaimRewards { owner: n("bp1") }), Err(StakexError::ClaimTooSoon)));
    chain.assert_conserved(&[]);
}

#[test]
fn renting_again_tops_up_the_open_loan() {
    let mut chain = chain_with_loan("loan_topup");
    chain.advance(DAY);
    let events = chain.ok(Action::RentCpu {
        from: n("carol"),
        receiver: n("carol"),
        loan_payment: sys(1_0000),
        loan_fund: sys(2_0000),
    });
    let [ActionEvent::RentResult { loan_num, rented_tokens }] = events.as_slice() else {
        panic!("unexpected events {events:?}");
    };
    assert_eq!(*loan_num, 1);
    assert!(rented_tokens.amount > 0 && rented_tokens.amount < 909_090);

    let state = chain.engine.reader();
    assert_eq!(state.rex_pool().unwrap().unwrap().loan_num, 1);
    assert_eq!(state.loans_by_expiry(ResourceKind::Cpu, 10).unwrap().len(), 1);
    let loan = state.rex_loan(1).unwrap().unwrap();
    assert_eq!(loan.payment, sys(2_0000));
    assert_eq!(loan.balance, sys(2_0000));
    assert_eq!(loan.total_staked.amount, 909_090 + rented_tokens.amount);
    assert_eq!(loan.expiration, T0 + DAY + 30 * DAY);
    assert_eq!(state.user_resources(n("carol")).unwrap().unwrap().cpu_weight, loan.total_staked);
    assert_eq!(state.rex_fund(n("carol")).unwrap().unwrap().balance, sys(6_0000));
    chain.assert_conserved(&["alice", "carol"]);
}

#[test]
fn cancelled_sell_order_reopens_loans() {
    let mut chain = Chain::with_producer("sell_cancel", 10_0000);
    chain.buy_rex("alice", 100_0000);
    chain.ok(Action::Deposit { owner: n("carol"), amount: sys(20_0000) });
    chain.ok(Action::RentCpu {
        from: n("carol"),
        receiver: n("carol"),
        loan_payment: sys(10_0000),
        loan_fund: sys(0),
    });
    chain.advance(6 * DAY);
    assert!(chain.ok(Action::SellRex { from: n("alice"), rex: rex(100_0000) }).is_empty());

    chain.ok(Action::CnclRexOrder { owner: n("alice") });
    let state = chain.engine.reader();
    assert!(state.rex_order(n("alice")).unwrap().is_none());
    assert_eq!(state.rex_balance(n("alice")).unwrap().unwrap().rex_balance, rex(100_0000));

    chain.ok(Action::Deposit { owner: n("dave"), amount: sys(5_0000) });
    chain.ok(Action::RentNet {
        from: n("dave"),
        receiver: n("dave"),
        loan_payment: sys(1_0000),
        loan_fund: sys(0),
    });
    assert!(matches!(
        chain.apply(Action::CnclRexOrder { owner: n("alice") }),
        Err(StakexError::OrderNotFound(_))
    ));
    chain.assert_conserved(&["alice", "carol", "dave"]);
}

#[test]
fn savings_round_trip_then_close() {
    let mut chain = Chain::with_producer("savings", 10_0000);
    chain.buy_rex("alice", 100_0000);
    chain.ok(Action::MvToSavings { owner: n("alice"), rex: rex(60_0000) });

    chain.advance(6 * DAY);
    let stored = chain.engine.reader().rex_balance(n("alice")).unwrap().unwrap();
    assert_eq!(stored.maturities.matured, 0);
    chain.ok(Action::Consolidate { owner: n("alice") });
    let balance = chain.engine.reader().rex_balance(n("alice")).unwrap().unwrap();
    assert_eq!(balance.maturities.matured, 40_0000);
    assert_eq!(balance.maturities.savings, 60_0000);
    assert!(balance.maturities.buckets.is_empty());

    assert!(matches!(
        chain.apply(Action::MvFrSavings { owner: n("alice"), rex: rex(60_0001) }),
        Err(StakexError::InsufficientSavings { .. })
    ));
    chain.ok(Action::MvFrSavings { owner: n("alice"), rex: rex(60_0000) });
    let balance = chain.engine.reader().rex_balance(n("alice")).unwrap().unwrap();
    assert_eq!(balance.maturities.savings, 0);
    assert_eq!(
        balance.maturities.buckets.iter().copied().collect::<Vec<_>>(),
        vec![(maturity_date(chain.now, 4), 60_0000)]
    );

    let events = chain.ok(Action::SellRex { from: n("alice"), rex: rex(40_0000) });
    assert_eq!(events, vec![ActionEvent::SellResult { proceeds: sys(40_0000) }]);
    chain.advance(5 * DAY);
    let events = chain.ok(Action::SellRex { from: n("alice"), rex: rex(60_0000) });
    assert_eq!(events, vec![ActionEvent::SellResult { proceeds: sys(60_0000) }]);

    chain.ok(Action::Withdraw { owner: n("alice"), amount: sys(100_0000) });
    chain.ok(Action::CloseRex { owner: n("alice") });
    let state = chain.engine.reader();
    assert!(state.rex_balance(n("alice")).unwrap().is_none());
    assert!(state.rex_fund(n("alice")).unwrap().is_none());
    assert_eq!(chain.balance("stx.rex"), 0);
    chain.assert_conserved(&["alice"]);
}

#[test]
fn witness_pay_is_shared_by_time_in_the_set() {
    let mut chain = Chain::with_producer("witness", 1_000_0000);
    chain.stake("carol", 50_0000, 50_0000);
    chain.register("carol");
    chain.stake("bob", 250_0000, 250_0000);
    chain.vote("bob", &["carol"]);
    chain.ok(Action::OnBlock { producer: n("bp1") });

    let global = chain.engine.reader().global().unwrap().unwrap();
    assert_eq!(global.witness_pay.change_rate, 2.0);

    // carol drops out of the set after one day, bp1 stays.
    chain.advance(DAY);
    chain.vote("bob", &[]);
    chain.advance(DAY);

    let now = chain.now;
    let state = chain.engine.reader();
    let global = state.global().unwrap().unwrap();
    assert_eq!(global.witness_pay.change_rate, 1.0);
    let bp1 = state.producer(n("bp1")).unwrap().unwrap();
    let carol = state.producer(n("carol")).unwrap().unwrap();

    let bp1_witness = state.witness_pay_share(n("bp1")).unwrap().unwrap().projected(now, 1.0);
    let carol_witness = state.witness_pay_share(n("carol")).unwrap().unwrap().projected(now, 0.0);
    assert_eq!(bp1_witness, 2.0 * DAY as f64);
    assert_eq!(carol_witness, DAY as f64);
    assert_eq!(global.witness_pay.projected(now), bp1_witness + carol_witness);

    let bp1_votes = state.vote_pay_share(n("bp1")).unwrap().unwrap().projected(now, bp1.total_votes);
    let carol_votes = state.vote_pay_share(n("carol")).unwrap().unwrap().projected(now, carol.total_votes);
    assert_eq!(carol.total_votes, 0.0);
    assert_eq!(global.vote_pay.projected(now), bp1_votes + carol_votes);

    let supply_before = chain.supply();
    chain.ok(Action::ClaimRewards { owner: n("carol") });
    let (_, _, witnesses) = network_split(chain.supply() - supply_before);
    let global = chain.engine.reader().global().unwrap().unwrap();
    let carol_pay = witnesses - global.perwitness_bucket;
    assert!((carol_pay - witnesses / 3).abs() <= 1, "carol got {carol_pay} of {witnesses}");
    assert_eq!(global.witness_pay.total_share, 2.0 * DAY as f64);
    assert_eq!(chain.engine.reader().witness_pay_share(n("carol")).unwrap().unwrap().share, 0.0);

    chain.ok(Action::ClaimRewards { owner: n("bp1") });
    let global = chain.engine.reader().global().unwrap().unwrap();
    assert!(global.perwitness_bucket <= 1);
    assert_eq!(global.witness_pay.total_share, 0.0);
    assert_eq!(chain.balance("stx.wpay"), global.perwitness_bucket);
    chain.assert_conserved(&[]);
}

#[test]
fn vote_pay_stops_after_the_claim_threshold() {
    let mut chain = Chain::with_producer("vote_threshold", 2_000_0000);
    chain.ok(Action::OnBlock { producer: n("bp1") });

    chain.advance(4 * DAY);
    let supply_before = chain.supply();
    chain.ok(Action::ClaimRewards { owner: n("bp1") });
    let (_, votes, _) = network_split(chain.supply() - supply_before);
    assert!(votes > 0);

    let global = chain.engine.reader().global().unwrap().unwrap();
    assert_eq!(global.pervote_bucket, votes);
    assert_eq!(chain.balance("stx.vpay"), votes);
    assert_eq!(global.vote_pay.total_share, 0.0);
    assert_eq!(global.vote_pay.change_rate, 2_000_0000.0);

    chain.advance(DAY + 1);
    chain.ok(Action::ClaimRewards { owner: n("bp1") });
    let global = chain.engine.reader().global().unwrap().unwrap();
    assert!(global.pervote_bucket <= 1);
    assert_eq!(global.vote_pay.total_share, 0.0);
    assert_eq!(chain.balance("stx.vpay"), global.pervote_bucket);
    chain.assert_conserved(&[]);
}

#[test]
fn claim_restarts_missing_pay_shares() {
    let mut chain = Chain::with_producer("missing_share", 2_000_0000);
    chain.ok(Action::OnBlock { producer: n("bp1") });
    chain.advance(2 * DAY);

    let mut writes = WriteSet::new();
    writes.entry(Table::VotePayShares).or_default().insert(name_key(n("bp1")), None);
    writes.entry(Table::WitnessPayShares).or_default().insert(name_key(n("bp1")), None);
    chain.engine.db.apply(writes).unwrap();

    let supply_before = chain.supply();
    chain.ok(Action::ClaimRewards { owner: n("bp1") });
    let (_, votes, witnesses) = network_split(chain.supply() - supply_before);

    let state = chain.engine.reader();
    let global = state.global().unwrap().unwrap();
    assert_eq!(global.pervote_bucket, votes);
    assert_eq!(global.perwitness_bucket, witnesses);
    for share in [state.vote_pay_share(n("bp1")).unwrap(), state.witness_pay_share(n("bp1")).unwrap()] {
        let share = share.expect("share row recreated");
        assert_eq!(share.share, 0.0);
        assert_eq!(share.last_update, chain.now);
    }
    chain.assert_conserved(&[]);
}

#[test]
fn undelegated_stake_is_refunded_after_delay() {
    let mut chain = Chain::with_producer("refund", 1_000_0000);
    let before = chain.balance("alice");
    chain.ok(Action::UndelegateBw {
        from: n("alice"),
        receiver: n("alice"),
        unstake_net_quantity: sys(100_0000),
        unstake_cpu_quantity: sys(0),
    });
    let state = chain.engine.reader();
    assert_eq!(state.voter(n("alice")).unwrap().unwrap().staked, 900_0000);
    assert_eq!(state.producer(n("bp1")).unwrap().unwrap().total_votes, 900_0000.0);

    assert!(matches!(chain.apply(Action::Refund { owner: n("alice") }), Err(StakexError::RefundNotDue { .. })));
    chain.advance(3 * DAY);
    chain.ok(Action::Refund { owner: n("alice") });
    assert_eq!(chain.balance("alice"), before + 100_0000);
    assert!(matches!(chain.apply(Action::Refund { owner: n("alice") }), Err(StakexError::RefundNotFound)));
}

#[test]
fn restaking_draws_on_pending_refund() {
    let mut chain = Chain::with_producer("restake", 1_000_0000);
    chain.ok(Action::UndelegateBw {
        from: n("alice"),
        receiver: n("alice"),
        unstake_net_quantity: sys(100_0000),
        unstake_cpu_quantity: sys(0),
    });
    let before = chain.balance("alice");
    chain.stake("alice", 60_0000, 0);
    assert_eq!(chain.balance("alice"), before);
    let refund = chain.engine.reader().refund_request(n("alice")).unwrap().unwrap();
    assert_eq!(refund.net_amount, sys(40_0000));
}

#[test]
fn ram_round_trip_feeds_the_pool() {
    let mut chain = Chain::with_producer("ram", 10_0000);
    chain.buy_rex("alice", 100_0000);
    let unlent_before = chain.engine.reader().rex_pool().unwrap().unwrap().total_unlent;

    chain.ok(Action::BuyRam { payer: n("bob"), receiver: n("bob"), quant: sys(100_0000) });
    let bytes = chain.engine.reader().user_resources(n("bob")).unwrap().unwrap().ram_bytes;
    assert!(bytes > 0);

    let before = chain.balance("bob");
    chain.ok(Action::SellRam { account: n("bob"), bytes });
    let returned = chain.balance("bob") - before;
    assert!(returned > 0 && returned < 100_0000);

    let state = chain.engine.reader();
    assert!(state.user_resources(n("bob")).unwrap().is_none());
    assert_eq!(state.global().unwrap().unwrap().total_ram_bytes_reserved, 0);
    assert_eq!(chain.balance("stx.ramfee"), 0);
    assert!(state.rex_pool().unwrap().unwrap().total_unlent.amount > unlent_before.amount);
    chain.assert_conserved(&["alice"]);
}

#[test]
fn name_auction_closes_after_quiet_period() {
    let mut chain = Chain::with_producer("names", 1_000_0000);
    chain.buy_rex("alice", 100_0000);
    let short = n("short");

    chain.ok(Action::BidName { bidder: n("bob"), newname: short, bid: sys(10_0000) });
    chain.ok(Action::BidName { bidder: n("carol"), newname: short, bid: sys(12_0000) });
    assert!(matches!(
        chain.apply(Action::BidName { bidder: n("bob"), newname: short, bid: sys(12_5000) }),
        Err(StakexError::BidTooLow)
    ));
    assert!(matches!(
        chain.apply(Action::BidName { bidder: n("bob"), newname: n("a.b"), bid: sys(1_0000) }),
        Err(StakexError::InvalidNameBid(_))
    ));

    let before = chain.balance("bob");
    chain.ok(Action::BidRefund { bidder: n("bob"), newname: short });
    assert_eq!(chain.balance("bob"), before + 10_0000);

    chain.advance(15 * DAY);
    chain.ok(Action::OnBlock { producer: n("bp1") });
    let state = chain.engine.reader();
    assert_eq!(state.name_bid(short).unwrap().unwrap().high_bid, -12_0000);
    assert_eq!(state.rex_pool().unwrap().unwrap().namebid_proceeds, sys(12_0000));
    assert!(matches!(
        chain.apply(Action::BidName { bidder: n("dave"), newname: short, bid: sys(20_0000) }),
        Err(StakexError::AuctionClosed)
    ));

    chain.ok(Action::RexExec { user: n("dave"), max: 1 });
    assert_eq!(chain.engine.reader().rex_pool().unwrap().unwrap().namebid_proceeds, sys(0));
    assert_eq!(chain.balance("stx.names"), 0);
    chain.assert_conserved(&["alice"]);
}

#[test]
fn failed_action_changes_nothing() {
    let mut chain = Chain::with_producer("rollback", 10_0000);
    let ledger_before = chain.ledger.clone();
    let clock_before = chain.engine.reader().clock().unwrap();

    chain.advance(10);
    assert!(matches!(
        chain.apply(Action::Withdraw { owner: n("bob"), amount: sys(1_0000) }),
        Err(StakexError::FundNotFound(_))
    ));
    assert_eq!(chain.ledger, ledger_before);
    assert_eq!(chain.engine.reader().clock().unwrap(), clock_before);
}

#[test]
fn authority_and_clock_are_enforced() {
    let mut chain = Chain::new("auth");
    let signed = SignedAction {
        action: Action::Deposit { owner: n("alice"), amount: sys(1) },
        signers: vec![n("bob")],
    };
    assert!(matches!(
        chain.engine.apply(&signed, &mut chain.ledger, chain.now),
        Err(StakexError::MissingAuthority(_))
    ));
    assert!(matches!(chain.apply(Action::Init { core_symbol: SYS }), Err(StakexError::AlreadyInitialized)));

    chain.now -= 1;
    assert!(matches!(
        chain.apply(Action::Deposit { owner: n("alice"), amount: sys(1) }),
        Err(StakexError::ClockWentBackwards { .. })
    ));
}
