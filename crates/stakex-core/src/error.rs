use thiserror::Error;

use crate::types::{AccountName, Asset, Symbol, Timestamp};

/// Coarse classification of every failure an entry point can produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid required signature. Not retryable without the signer.
    Authorization,
    /// Malformed input. The caller must correct it and resubmit.
    Validation,
    /// Funds, matured shares or pool liquidity are short. Retryable later.
    InsufficientResource,
    /// A record the invariants guarantee is missing. Indicates a prior bug.
    StateInconsistency,
    /// The storage layer itself failed.
    Storage,
}

#[derive(Debug, Error)]
pub enum StakexError {
    // ── Authorization ────────────────────────────────────────────────────────
    #[error("missing authority of {0}")]
    MissingAuthority(AccountName),

    // ── Primitive validation ─────────────────────────────────────────────────
    #[error("invalid account name: {0}")]
    InvalidName(String),

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("invalid asset: {0}")]
    InvalidAsset(String),

    #[error("symbol mismatch: expected {expected}, got {got}")]
    SymbolMismatch { expected: Symbol, got: Symbol },

    #[error("asset amount out of range")]
    AmountOverflow,

    #[error("invalid amount: {0}")]
    InvalidAmount(&'static str),

    // ── System lifecycle ─────────────────────────────────────────────────────
    #[error("system has already been initialized")]
    AlreadyInitialized,

    #[error("system has not been initialized")]
    NotInitialized,

    #[error("chain time went backwards: last applied {last}, got {now}")]
    ClockWentBackwards { last: Timestamp, now: Timestamp },

    #[error("invalid revision: {0}")]
    InvalidRevision(String),

    #[error("chain is not activated: at least {min} must be staked and voting")]
    ChainNotActivated { min: i64 },

    #[error("action has no effect")]
    NoEffect,

    // ── Exchange ─────────────────────────────────────────────────────────────
    #[error("invalid conversion: {0}")]
    InvalidConversion(String),

    #[error("ram market: {0}")]
    InvalidRamOperation(&'static str),

    // ── Resource exchange pool ───────────────────────────────────────────────
    #[error("insufficient funds: need {need}, have {have}")]
    InsufficientFunds { need: Asset, have: Asset },

    #[error("must deposit to REX fund first")]
    FundNotFound(AccountName),

    #[error("account {0} has no REX balance")]
    RexBalanceNotFound(AccountName),

    #[error("insufficient matured REX: requested {requested}, matured {matured}")]
    InsufficientMaturedShares { requested: i64, matured: i64 },

    #[error("insufficient REX balance: requested {requested}, available {available}")]
    InsufficientShares { requested: i64, available: i64 },

    #[error("insufficient REX in savings: requested {requested}, saved {saved}")]
    InsufficientSavings { requested: i64, saved: i64 },

    #[error("sell proceeds are negligible")]
    NegligibleProceeds,

    #[error("lendable REX pool is empty")]
    PoolEmpty,

    #[error("REX system is not initialized")]
    RexNotInitialized,

    #[error("no sellrex order is scheduled for {0}")]
    OrderNotFound(AccountName),

    #[error("sellrex order has been filled and cannot be cancelled")]
    OrderAlreadyFilled,

    #[error("account has remaining REX balance, must sell first")]
    RemainingRexBalance,

    #[error("must vote for at least 21 producers or for a proxy before buying REX")]
    VotingRequirementNotMet,

    // ── Loans ────────────────────────────────────────────────────────────────
    #[error("rental unavailable: {0}")]
    RentalUnavailable(&'static str),

    #[error("{kind} loan {loan_num} not found")]
    LoanNotFound { kind: crate::types::ResourceKind, loan_num: u64 },

    #[error("user must be loan creator")]
    NotLoanOwner,

    #[error("loan has already expired")]
    LoanExpired,

    #[error("loan underfunded: balance after defund {remaining} is below the renewal payment {required}")]
    LoanUnderfunded { remaining: Asset, required: Asset },

    // ── Voting ───────────────────────────────────────────────────────────────
    #[error("user must stake before they can vote")]
    VoterNotFound(AccountName),

    #[error("cannot vote for producers and proxy at same time")]
    ProxyAndProducers,

    #[error("cannot proxy to self")]
    ProxyToSelf,

    #[error("attempt to vote for too many producers: max {max}, got {got}")]
    TooManyProducers { max: usize, got: usize },

    #[error("producer votes must be unique and sorted")]
    ProducersNotSorted,

    #[error("account registered as a proxy is not allowed to use a proxy")]
    ProxyCannotUseProxy,

    #[error("account that uses a proxy is not allowed to become a proxy")]
    ProxyUsesProxy,

    #[error("{0} is not registered as a proxy")]
    NotAProxy(AccountName),

    #[error("producer {0} is not registered")]
    ProducerNotRegistered(AccountName),

    #[error("producer {0} is not currently active")]
    ProducerNotActive(AccountName),

    #[error("producers cannot vote")]
    ProducersCannotVote,

    #[error("url too long: max {max} bytes")]
    UrlTooLong { max: usize },

    #[error("producer key must not be empty")]
    EmptyProducerKey,

    #[error("insufficient stake to register as producer: need more than {min}")]
    ProducerStakeTooLow { min: i64 },

    // ── Rewards ──────────────────────────────────────────────────────────────
    #[error("already claimed rewards within past day")]
    ClaimTooSoon,

    // ── Staking ──────────────────────────────────────────────────────────────
    #[error("delegated bandwidth record does not exist")]
    DelegationNotFound,

    #[error("insufficient staked {0} bandwidth")]
    InsufficientStake(&'static str),

    #[error("refund request not found")]
    RefundNotFound,

    #[error("refund is not available until {available_at}")]
    RefundNotDue { available_at: Timestamp },

    // ── Name auctions ────────────────────────────────────────────────────────
    #[error("invalid name bid: {0}")]
    InvalidNameBid(&'static str),

    #[error("this auction has already closed")]
    AuctionClosed,

    #[error("must increase bid by 10%")]
    BidTooLow,

    #[error("account is already highest bidder")]
    AlreadyHighestBidder,

    #[error("bid refund not found")]
    BidRefundNotFound,

    // ── External settlement ──────────────────────────────────────────────────
    #[error("settlement failed: {0}")]
    SettlementFailed(String),

    // ── State consistency ────────────────────────────────────────────────────
    #[error("state inconsistency: {0}")]
    StateInconsistency(String),

    // ── Serialization / storage ──────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl StakexError {
    pub fn kind(&self) -> ErrorKind {
        use StakexError::*;
        match self {
            MissingAuthority(_) => ErrorKind::Authorization,

            InsufficientFunds { .. }
            | FundNotFound(_)
            | InsufficientMaturedShares { .. }
            | InsufficientShares { .. }
            | InsufficientSavings { .. }
            | NegligibleProceeds
            | PoolEmpty
            | RentalUnavailable(_)
            | LoanUnderfunded { .. }
            | ChainNotActivated { .. }
            | ClaimTooSoon
            | InsufficientStake(_)
            | RefundNotDue { .. }
            | ProducerStakeTooLow { .. }
            | SettlementFailed(_) => ErrorKind::InsufficientResource,

            StateInconsistency(_) => ErrorKind::StateInconsistency,

            Serialization(_) | Storage(_) => ErrorKind::Storage,

            _ => ErrorKind::Validation,
        }
    }

    pub fn missing(what: impl Into<String>) -> Self {
        StakexError::StateInconsistency(format!("{} not found", what.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        let owner = AccountName::constant("alice");
        assert_eq!(StakexError::MissingAuthority(owner).kind(), ErrorKind::Authorization);
        assert_eq!(StakexError::ProducersNotSorted.kind(), ErrorKind::Validation);
        assert_eq!(
            StakexError::InsufficientMaturedShares { requested: 2, matured: 1 }.kind(),
            ErrorKind::InsufficientResource
        );
        assert_eq!(StakexError::missing("rex pool").kind(), ErrorKind::StateInconsistency);
        assert_eq!(StakexError::Storage("io".into()).kind(), ErrorKind::Storage);
        assert_eq!(StakexError::missing("rex pool").to_string(), "state inconsistency: rex pool not found");
    }
}
