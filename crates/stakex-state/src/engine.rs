use std::sync::Arc;

use stakex_core::constants::{RAMCORE_INITIAL_SUPPLY, RAMCORE_SYMBOL, RAM_QUOTE_SEED_DIVISOR, RAM_SYMBOL};
use stakex_core::{AccountName, Action, ActionEvent, Asset, SignedAction, StakexError, Symbol, SystemParams, Timestamp};
use stakex_econ::ExchangeState;
use tracing::{debug, info, warn};

use crate::db::{StateDb, WriteSet};
use crate::records::GlobalState;
use crate::service::{Authorizer, Settlement, SignerAuthorizer, TokenService};
use crate::staged::StagedState;

// ── ApplyContext ──────────────────────────────────────────────────────────────

/// Everything one action may touch while it runs.
///
/// Handlers live in `impl ApplyContext` blocks spread over the domain
/// modules. They read and write `state`, mutate `global`, and queue token
/// movements; nothing is visible outside until the engine commits.
pub(crate) struct ApplyContext<'a> {
    pub(crate) state: StagedState<'a>,
    pub(crate) global: GlobalState,
    pub(crate) params: &'a SystemParams,
    pub(crate) token: &'a dyn TokenService,
    pub(crate) now: Timestamp,
    settlements: Vec<Settlement>,
    events: Vec<ActionEvent>,
}

impl<'a> ApplyContext<'a> {
    pub(crate) fn core(&self, amount: i64) -> Asset {
        self.global.core(amount)
    }

    pub(crate) fn core_symbol(&self) -> Symbol {
        self.global.core_symbol
    }

    pub(crate) fn require_core(&self, quantity: &Asset) -> Result<(), StakexError> {
        if quantity.symbol != self.global.core_symbol {
            return Err(StakexError::SymbolMismatch {
                expected: self.global.core_symbol,
                got: quantity.symbol,
            });
        }
        if !quantity.is_valid() {
            return Err(StakexError::InvalidAsset(quantity.to_string()));
        }
        Ok(())
    }

    pub(crate) fn require_activated(&self) -> Result<(), StakexError> {
        if self.global.total_activated_stake < self.params.min_activated_stake {
            return Err(StakexError::ChainNotActivated { min: self.params.min_activated_stake });
        }
        Ok(())
    }

    /// Queue a transfer; zero amounts are dropped.
    pub(crate) fn transfer(&mut self, from: AccountName, to: AccountName, quantity: Asset, memo: &str) {
        if quantity.amount == 0 {
            return;
        }
        self.settlements.push(Settlement::Transfer { from, to, quantity, memo: memo.to_string() });
    }

    pub(crate) fn issue(&mut self, to: AccountName, quantity: Asset, memo: &str) {
        if quantity.amount == 0 {
            return;
        }
        self.settlements.push(Settlement::Issue { to, quantity, memo: memo.to_string() });
    }

    pub(crate) fn emit(&mut self, event: ActionEvent) {
        self.events.push(event);
    }

    fn dispatch(&mut self, action: &Action) -> Result<(), StakexError> {
        use Action::*;
        match action {
            Init { core_symbol } => self.init(*core_symbol),
            OnBlock { producer } => self.on_block(*producer),
            UpdtRevision { revision } => self.global.migrate_to(*revision),

            Deposit { owner, amount } => self.deposit(*owner, *amount),
            Withdraw { owner, amount } => self.withdraw(*owner, *amount),
            BuyRex { from, amount } => self.buy_rex(*from, *amount),
            UnstakeToRex { owner, receiver, from_net, from_cpu } => {
                self.unstake_to_rex(*owner, *receiver, *from_net, *from_cpu)
            }
            SellRex { from, rex } => self.sell_rex(*from, *rex),
            CnclRexOrder { owner } => self.cancel_rex_order(*owner),
            UpdateRex { owner } => self.update_rex(*owner),
            Consolidate { owner } => self.consolidate(*owner),
            MvToSavings { owner, rex } => self.move_to_savings(*owner, *rex),
            MvFrSavings { owner, rex } => self.move_from_savings(*owner, *rex),
            CloseRex { owner } => self.close_rex(*owner),
            SetRex { balance } => self.set_rex(*balance),
            RexExec { max, .. } => self.run_rex(*max),

            RentCpu { from, receiver, loan_payment, loan_fund }
            | RentNet { from, receiver, loan_payment, loan_fund } => {
                let kind = action.loan_kind().ok_or_else(|| StakexError::missing("loan kind"))?;
                self.rent(kind, *from, *receiver, *loan_payment, *loan_fund)
            }
            FundCpuLoan { from, loan_num, payment } | FundNetLoan { from, loan_num, payment } => {
                let kind = action.loan_kind().ok_or_else(|| StakexError::missing("loan kind"))?;
                self.fund_loan(kind, *from, *loan_num, *payment)
            }
            DefundCpuLoan { from, loan_num, amount } | DefundNetLoan { from, loan_num, amount } => {
                let kind = action.loan_kind().ok_or_else(|| StakexError::missing("loan kind"))?;
                self.defund_loan(kind, *from, *loan_num, *amount)
            }

            RegProducer { producer, producer_key, url, location } => {
                self.register_producer(*producer, producer_key.clone(), url, *location)
            }
            UnregProd { producer } => self.unregister_producer(*producer),
            RmvProducer { producer } => self.unregister_producer(*producer),
            VoteProducer { voter, proxy, producers } => self.vote_producer(*voter, *proxy, producers),
            RegProxy { proxy, isproxy } => self.register_proxy(*proxy, *isproxy),

            ClaimRewards { owner } => self.claim_rewards(*owner),

            DelegateBw { from, receiver, stake_net_quantity, stake_cpu_quantity, transfer } => {
                self.delegate_bw(*from, *receiver, *stake_net_quantity, *stake_cpu_quantity, *transfer)
            }
            UndelegateBw { from, receiver, unstake_net_quantity, unstake_cpu_quantity } => {
                self.undelegate_bw(*from, *receiver, *unstake_net_quantity, *unstake_cpu_quantity)
            }
            Refund { owner } => self.refund(*owner),

            BuyRam { payer, receiver, quant } => self.buy_ram(*payer, *receiver, *quant),
            BuyRamBytes { payer, receiver, bytes } => self.buy_ram_bytes(*payer, *receiver, *bytes),
            SellRam { account, bytes } => self.sell_ram(*account, *bytes),
            SetRam { max_ram_size } => self.set_ram(*max_ram_size),

            BidName { bidder, newname, bid } => self.bid_name(*bidder, *newname, *bid),
            BidRefund { bidder, newname } => self.bid_refund(*bidder, *newname),
        }
    }

    /// Create the RAM market against the existing core token supply.
    fn init(&mut self, core_symbol: Symbol) -> Result<(), StakexError> {
        let supply = self
            .token
            .supply(core_symbol)?
            .ok_or_else(|| StakexError::InvalidSymbol(format!("core token {core_symbol} does not exist")))?;
        if supply.symbol != core_symbol {
            return Err(StakexError::InvalidSymbol(format!(
                "specified core symbol {core_symbol} does not match token precision {}",
                supply.symbol
            )));
        }
        if supply.amount <= 0 {
            return Err(StakexError::InvalidAmount("system token supply must be greater than 0"));
        }

        let free_ram = i64::try_from(self.global.free_ram()).map_err(|_| StakexError::AmountOverflow)?;
        let market = ExchangeState::new(
            Asset::new(RAMCORE_INITIAL_SUPPLY, RAMCORE_SYMBOL),
            Asset::new(free_ram, RAM_SYMBOL),
            Asset::new(supply.amount / RAM_QUOTE_SEED_DIVISOR, core_symbol),
        );
        self.state.put_ram_market(&market)?;
        info!(core = %core_symbol, supply = %supply, "system initialized");
        Ok(())
    }

    fn finish(mut self) -> Result<(WriteSet, Vec<Settlement>, Vec<ActionEvent>), StakexError> {
        self.state.put_global(&self.global)?;
        Ok((self.state.into_writes(), self.settlements, self.events))
    }
}

// ── SystemEngine ──────────────────────────────────────────────────────────────

/// The state transition engine.
///
/// Each `apply` call is atomic: the action's state writes and its token
/// settlements are either both applied or neither is.
pub struct SystemEngine {
    pub db: Arc<StateDb>,
    params: SystemParams,
    auth: Box<dyn Authorizer + Send + Sync>,
}

impl SystemEngine {
    pub fn new(db: Arc<StateDb>, params: SystemParams) -> Self {
        Self::with_authorizer(db, params, Box::new(SignerAuthorizer))
    }

    pub fn with_authorizer(db: Arc<StateDb>, params: SystemParams, auth: Box<dyn Authorizer + Send + Sync>) -> Self {
        Self { db, params, auth }
    }

    pub fn params(&self) -> &SystemParams {
        &self.params
    }

    /// Read-only view of the committed state.
    pub fn reader(&self) -> StagedState<'_> {
        StagedState::new(&self.db)
    }

    /// Authorize, run and commit one action at time `now`.
    pub fn apply(
        &self,
        signed: &SignedAction,
        token: &mut dyn TokenService,
        now: Timestamp,
    ) -> Result<Vec<ActionEvent>, StakexError> {
        let action = &signed.action;
        let required = action.required_authority();
        if !self.auth.satisfies(&signed.signers, required) {
            warn!(action = action.name(), %required, "missing authority");
            return Err(StakexError::MissingAuthority(required));
        }

        let mut state = StagedState::new(&self.db);
        if let Some(last) = state.clock()? {
            if now < last {
                return Err(StakexError::ClockWentBackwards { last, now });
            }
        }

        let global = match (action, state.global()?) {
            (Action::Init { .. }, Some(_)) => return Err(StakexError::AlreadyInitialized),
            (Action::Init { core_symbol }, None) => GlobalState::new(*core_symbol, now),
            (_, Some(global)) => global,
            (_, None) => return Err(StakexError::NotInitialized),
        };
        state.set_clock(now)?;

        let (writes, settlements, events) = {
            let mut cx = ApplyContext {
                state,
                global,
                params: &self.params,
                token: &*token,
                now,
                settlements: Vec::new(),
                events: Vec::new(),
            };
            if let Err(e) = cx.dispatch(action) {
                debug!(action = action.name(), error = %e, "action rejected");
                return Err(e);
            }
            cx.finish()?
        };

        token.settle(&settlements)?;
        if let Err(e) = self.db.apply(writes) {
            warn!(action = action.name(), error = %e, "state commit failed, reverting settlements");
            token.revert(&settlements)?;
            return Err(e);
        }

        info!(
            action = action.name(),
            actor = %required,
            settlements = settlements.len(),
            events = events.len(),
            "applied action"
        );
        Ok(events)
    }
}
