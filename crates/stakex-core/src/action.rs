use serde::{Deserialize, Serialize};

use crate::constants::SYSTEM_ACCOUNT;
use crate::types::{AccountName, Asset, ProducerKey, ResourceKind, Symbol};

// ── Action ────────────────────────────────────────────────────────────────────

/// Every entry point of the system is one of these variants.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Action {
    // ── System ───────────────────────────────────────────────────────────────

    /// One-time setup: creates the RAM market and the global state.
    Init { core_symbol: Symbol },

    /// Per-block hook run by the host for the block's producer.
    OnBlock { producer: AccountName },

    /// Step the global state revision by one.
    UpdtRevision { revision: u8 },

    // ── Resource exchange: funds and shares ──────────────────────────────────

    Deposit { owner: AccountName, amount: Asset },

    Withdraw { owner: AccountName, amount: Asset },

    BuyRex { from: AccountName, amount: Asset },

    /// Buy REX with tokens currently staked to `receiver`.
    UnstakeToRex {
        owner: AccountName,
        receiver: AccountName,
        from_net: Asset,
        from_cpu: Asset,
    },

    SellRex { from: AccountName, rex: Asset },

    CnclRexOrder { owner: AccountName },

    UpdateRex { owner: AccountName },

    Consolidate { owner: AccountName },

    MvToSavings { owner: AccountName, rex: Asset },

    MvFrSavings { owner: AccountName, rex: Asset },

    CloseRex { owner: AccountName },

    /// Reset the rent connector of the pool (system only).
    SetRex { balance: Asset },

    /// Bounded maintenance: expired loans, then queued sell orders.
    RexExec { user: AccountName, max: u16 },

    // ── Resource exchange: loans ─────────────────────────────────────────────

    RentCpu {
        from: AccountName,
        receiver: AccountName,
        loan_payment: Asset,
        loan_fund: Asset,
    },

    RentNet {
        from: AccountName,
        receiver: AccountName,
        loan_payment: Asset,
        loan_fund: Asset,
    },

    FundCpuLoan { from: AccountName, loan_num: u64, payment: Asset },

    FundNetLoan { from: AccountName, loan_num: u64, payment: Asset },

    DefundCpuLoan { from: AccountName, loan_num: u64, amount: Asset },

    DefundNetLoan { from: AccountName, loan_num: u64, amount: Asset },

    // ── Voting ───────────────────────────────────────────────────────────────

    RegProducer {
        producer: AccountName,
        producer_key: ProducerKey,
        url: String,
        location: u16,
    },

    UnregProd { producer: AccountName },

    /// Forced deactivation (system only).
    RmvProducer { producer: AccountName },

    /// Vote either through `proxy` or directly for `producers`, never both.
    VoteProducer {
        voter: AccountName,
        #[serde(default)]
        proxy: Option<AccountName>,
        #[serde(default)]
        producers: Vec<AccountName>,
    },

    RegProxy { proxy: AccountName, isproxy: bool },

    // ── Rewards ──────────────────────────────────────────────────────────────

    ClaimRewards { owner: AccountName },

    // ── Staking ──────────────────────────────────────────────────────────────

    DelegateBw {
        from: AccountName,
        receiver: AccountName,
        stake_net_quantity: Asset,
        stake_cpu_quantity: Asset,
        /// Hand stake ownership to `receiver`.
        #[serde(default)]
        transfer: bool,
    },

    UndelegateBw {
        from: AccountName,
        receiver: AccountName,
        unstake_net_quantity: Asset,
        unstake_cpu_quantity: Asset,
    },

    Refund { owner: AccountName },

    // ── RAM market ───────────────────────────────────────────────────────────

    BuyRam { payer: AccountName, receiver: AccountName, quant: Asset },

    BuyRamBytes { payer: AccountName, receiver: AccountName, bytes: u32 },

    SellRam { account: AccountName, bytes: i64 },

    SetRam { max_ram_size: u64 },

    // ── Name auctions ────────────────────────────────────────────────────────

    BidName { bidder: AccountName, newname: AccountName, bid: Asset },

    BidRefund { bidder: AccountName, newname: AccountName },
}

impl Action {
    /// Account whose authority the action requires.
    pub fn required_authority(&self) -> AccountName {
        use Action::*;
        match self {
            Init { .. }
            | OnBlock { .. }
            | UpdtRevision { .. }
            | SetRex { .. }
            | RmvProducer { .. }
            | SetRam { .. } => SYSTEM_ACCOUNT,

            Deposit { owner, .. }
            | Withdraw { owner, .. }
            | UnstakeToRex { owner, .. }
            | CnclRexOrder { owner }
            | UpdateRex { owner }
            | Consolidate { owner }
            | MvToSavings { owner, .. }
            | MvFrSavings { owner, .. }
            | CloseRex { owner }
            | ClaimRewards { owner }
            | Refund { owner } => *owner,

            BuyRex { from, .. }
            | SellRex { from, .. }
            | RentCpu { from, .. }
            | RentNet { from, .. }
            | FundCpuLoan { from, .. }
            | FundNetLoan { from, .. }
            | DefundCpuLoan { from, .. }
            | DefundNetLoan { from, .. }
            | DelegateBw { from, .. }
            | UndelegateBw { from, .. } => *from,

            RexExec { user, .. } => *user,
            RegProducer { producer, .. } | UnregProd { producer } => *producer,
            VoteProducer { voter, .. } => *voter,
            RegProxy { proxy, .. } => *proxy,
            BuyRam { payer, .. } | BuyRamBytes { payer, .. } => *payer,
            SellRam { account, .. } => *account,
            BidName { bidder, .. } | BidRefund { bidder, .. } => *bidder,
        }
    }

    /// Short action name for logs.
    pub fn name(&self) -> &'static str {
        use Action::*;
        match self {
            Init { .. } => "init",
            OnBlock { .. } => "onblock",
            UpdtRevision { .. } => "updtrevision",
            Deposit { .. } => "deposit",
            Withdraw { .. } => "withdraw",
            BuyRex { .. } => "buyrex",
            UnstakeToRex { .. } => "unstaketorex",
            SellRex { .. } => "sellrex",
            CnclRexOrder { .. } => "cnclrexorder",
            UpdateRex { .. } => "updaterex",
            Consolidate { .. } => "consolidate",
            MvToSavings { .. } => "mvtosavings",
            MvFrSavings { .. } => "mvfrsavings",
            CloseRex { .. } => "closerex",
            SetRex { .. } => "setrex",
            RexExec { .. } => "rexexec",
            RentCpu { .. } => "rentcpu",
            RentNet { .. } => "rentnet",
            FundCpuLoan { .. } => "fundcpuloan",
            FundNetLoan { .. } => "fundnetloan",
            DefundCpuLoan { .. } => "defcpuloan",
            DefundNetLoan { .. } => "defnetloan",
            RegProducer { .. } => "regproducer",
            UnregProd { .. } => "unregprod",
            RmvProducer { .. } => "rmvproducer",
            VoteProducer { .. } => "voteproducer",
            RegProxy { .. } => "regproxy",
            ClaimRewards { .. } => "claimrewards",
            DelegateBw { .. } => "delegatebw",
            UndelegateBw { .. } => "undelegatebw",
            Refund { .. } => "refund",
            BuyRam { .. } => "buyram",
            BuyRamBytes { .. } => "buyrambytes",
            SellRam { .. } => "sellram",
            SetRam { .. } => "setram",
            BidName { .. } => "bidname",
            BidRefund { .. } => "bidrefund",
        }
    }

    /// Loan book an action targets, for the loan entry points.
    pub fn loan_kind(&self) -> Option<ResourceKind> {
        use Action::*;
        match self {
            RentCpu { .. } | FundCpuLoan { .. } | DefundCpuLoan { .. } => Some(ResourceKind::Cpu),
            RentNet { .. } | FundNetLoan { .. } | DefundNetLoan { .. } => Some(ResourceKind::Net),
            _ => None,
        }
    }
}

/// An action together with the accounts that signed it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SignedAction {
    #[serde(flatten)]
    pub action: Action,
    pub signers: Vec<AccountName>,
}

impl SignedAction {
    /// Signed by exactly the authority the action requires.
    pub fn by_required(action: Action) -> Self {
        let signer = action.required_authority();
        Self { action, signers: vec![signer] }
    }
}

// ── ActionEvent ───────────────────────────────────────────────────────────────

/// Result records emitted by entry points so callers can observe the
/// amounts an action produced.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ActionEvent {
    /// Shares issued by `buyrex` or `unstaketorex`.
    BuyResult { rex_received: Asset },
    /// Proceeds of an immediately filled `sellrex`.
    SellResult { proceeds: Asset },
    /// A queued sell order was filled or its proceeds collected.
    OrderResult { owner: AccountName, proceeds: Asset },
    /// Tokens staked by a new or topped-up loan.
    RentResult { loan_num: u64, rented_tokens: Asset },
}
