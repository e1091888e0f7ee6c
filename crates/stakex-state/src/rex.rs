//! Resource exchange: a share pool over lendable tokens.
//!
//! Buying issues shares at the pool's current ratio
//!
//!   R1 = R0 × S1 / S0        rex_issued = R1 − R0
//!
//! and selling redeems `rex × S0 / R0` tokens when enough of the pool is
//! unlent. Loans stake `get_bancor_output(total_rent, total_unlent, payment)`
//! tokens to their receiver for one term; the payment joins the pool.
//!
//! Invariant kept by every handler: `total_lendable == total_lent + total_unlent`.

use stakex_core::constants::{NAMES_ACCOUNT, REX_ACCOUNT, REX_SYMBOL, STAKE_ACCOUNT};
use stakex_core::{AccountName, ActionEvent, Asset, ResourceKind, StakexError};
use stakex_econ::{get_bancor_output, maturity_date};
use tracing::{debug, info};

use crate::engine::ApplyContext;
use crate::records::{RexBalance, RexFund, RexLoan, RexOrder, RexPool};

/// Result of trying to sell shares against the pool.
#[derive(Debug)]
struct OrderOutcome {
    success: bool,
    proceeds: Asset,
    stake_change: Asset,
}

/// `a × b / c` in 128-bit, for non-negative operands.
fn mul_div(a: i64, b: i64, c: i64) -> Result<i64, StakexError> {
    if a < 0 || b < 0 || c <= 0 {
        return Err(StakexError::StateInconsistency(format!("invalid share ratio {a} * {b} / {c}")));
    }
    let out = a as u128 * b as u128 / c as u128;
    i64::try_from(out).map_err(|_| StakexError::AmountOverflow)
}

impl ApplyContext<'_> {
    // ── Pool helpers ─────────────────────────────────────────────────────────

    fn pool(&self) -> Result<RexPool, StakexError> {
        self.state.rex_pool()?.ok_or(StakexError::RexNotInitialized)
    }

    fn rex_available(&self) -> Result<bool, StakexError> {
        Ok(self.state.rex_pool()?.is_some_and(|p| p.total_rex.amount > 0))
    }

    /// Loans are offered only while no sell order waits for liquidity.
    fn rex_loans_available(&self) -> Result<bool, StakexError> {
        Ok(self.rex_available()? && !self.state.has_open_orders()?)
    }

    fn check_rex_asset(rex: &Asset) -> Result<(), StakexError> {
        if rex.symbol != REX_SYMBOL || rex.amount <= 0 {
            return Err(StakexError::InvalidAmount("asset must be a positive amount of REX"));
        }
        Ok(())
    }

    fn require_positive_core(&self, quantity: &Asset) -> Result<(), StakexError> {
        self.require_core(quantity)?;
        if quantity.amount <= 0 {
            return Err(StakexError::InvalidAmount("must use positive asset amount"));
        }
        Ok(())
    }

    /// Send tokens held by `from` into the pool as unlent liquidity.
    pub(crate) fn channel_to_rex(&mut self, from: AccountName, amount: Asset) -> Result<(), StakexError> {
        if amount.amount <= 0 || !self.rex_available()? {
            return Ok(());
        }
        let mut pool = self.pool()?;
        pool.total_unlent = pool.total_unlent.checked_add(amount)?;
        pool.total_lendable = pool.total_unlent.checked_add(pool.total_lent)?;
        self.state.put_rex_pool(&pool)?;
        self.transfer(from, REX_ACCOUNT, amount, "transfer from system to rex");
        Ok(())
    }

    /// Record auction proceeds for the next maintenance pass.
    pub(crate) fn channel_namebid_to_rex(&mut self, highest_bid: i64) -> Result<(), StakexError> {
        if !self.rex_available()? {
            return Ok(());
        }
        let mut pool = self.pool()?;
        pool.namebid_proceeds.amount = pool
            .namebid_proceeds
            .amount
            .checked_add(highest_bid)
            .ok_or(StakexError::AmountOverflow)?;
        self.state.put_rex_pool(&pool)
    }

    fn transfer_to_fund(&mut self, owner: AccountName, amount: Asset) -> Result<(), StakexError> {
        if amount.amount <= 0 {
            return Ok(());
        }
        let fund = match self.state.rex_fund(owner)? {
            Some(mut fund) => {
                fund.balance = fund.balance.checked_add(amount)?;
                fund
            }
            None => RexFund { owner, balance: amount },
        };
        self.state.put_rex_fund(&fund)
    }

    fn transfer_from_fund(&mut self, owner: AccountName, amount: Asset) -> Result<(), StakexError> {
        if amount.amount <= 0 {
            return Err(StakexError::InvalidAmount("must transfer positive amount from REX fund"));
        }
        let mut fund = self.state.rex_fund(owner)?.ok_or(StakexError::FundNotFound(owner))?;
        if fund.balance.amount < amount.amount {
            return Err(StakexError::InsufficientFunds { need: amount, have: fund.balance });
        }
        fund.balance = fund.balance.checked_sub(amount)?;
        self.state.put_rex_fund(&fund)
    }

    /// Add `payment` tokens to the pool, returning the shares issued.
    fn add_to_rex_pool(&mut self, payment: Asset) -> Result<Asset, StakexError> {
        let core = self.core_symbol();
        let existing = self.state.rex_pool()?;
        let pool = match existing {
            Some(mut pool) if pool.total_rex.amount > 0 => {
                let s0 = pool.total_lendable.amount;
                if s0 <= 0 {
                    return Err(StakexError::PoolEmpty);
                }
                let s1 = s0.checked_add(payment.amount).ok_or(StakexError::AmountOverflow)?;
                let r0 = pool.total_rex.amount;
                let r1 = mul_div(s1, r0, s0)?;
                pool.total_lendable.amount = s1;
                pool.total_rex.amount = r1;
                pool.total_unlent = pool.total_lendable.checked_sub(pool.total_lent)?;
                if pool.total_unlent.amount < 0 {
                    return Err(StakexError::StateInconsistency("unlent pool balance went negative".into()));
                }
                let issued = r1 - r0;
                self.state.put_rex_pool(&pool)?;
                return Ok(Asset::new(issued, REX_SYMBOL));
            }
            // An emptied pool restarts from the bootstrap ratio but keeps
            // its loan counter and pending auction proceeds.
            Some(pool) => RexPool {
                namebid_proceeds: pool.namebid_proceeds,
                loan_num: pool.loan_num,
                ..RexPool::empty(core)
            },
            None => RexPool::empty(core),
        };

        let issued = payment
            .amount
            .checked_mul(self.params.rex_bootstrap_ratio)
            .ok_or(StakexError::AmountOverflow)?;
        let pool = RexPool {
            total_lendable: payment,
            total_unlent: payment,
            total_lent: Asset::zero(core),
            total_rent: Asset::new(self.params.rex_init_total_rent, core),
            total_rex: Asset::new(issued, REX_SYMBOL),
            ..pool
        };
        self.state.put_rex_pool(&pool)?;
        info!(payment = %payment, shares = issued, "resource exchange pool bootstrapped");
        Ok(Asset::new(issued, REX_SYMBOL))
    }

    /// Credit freshly issued shares to `owner`. Returns the change in the
    /// owner's vote stake.
    fn add_to_rex_balance(&mut self, owner: AccountName, payment: Asset, rex_received: Asset) -> Result<i64, StakexError> {
        let pool = self.pool()?;
        let (init_stake, mut balance) = match self.state.rex_balance(owner)? {
            Some(mut balance) => {
                let init = balance.vote_stake.amount;
                balance.rex_balance = balance.rex_balance.checked_add(rex_received)?;
                balance.vote_stake.amount =
                    mul_div(balance.rex_balance.amount, pool.total_lendable.amount, pool.total_rex.amount)?;
                (init, balance)
            }
            None => (
                0,
                RexBalance {
                    owner,
                    vote_stake: payment,
                    rex_balance: rex_received,
                    maturities: Default::default(),
                },
            ),
        };
        balance
            .maturities
            .add(maturity_date(self.now, self.params.rex_maturity_days), rex_received.amount);
        let delta = balance.vote_stake.amount - init_stake;
        self.state.put_rex_balance(&balance)?;
        Ok(delta)
    }

    /// Sell `rex` shares of `balance` if the pool has the liquidity. On
    /// success the pool and `balance` are updated in place.
    fn fill_rex_order(&mut self, balance: &mut RexBalance, rex: Asset) -> Result<OrderOutcome, StakexError> {
        let core = self.core_symbol();
        let mut pool = self.pool()?;
        let s0 = pool.total_lendable.amount;
        let r0 = pool.total_rex.amount;
        if r0 <= 0 {
            return Err(StakexError::PoolEmpty);
        }
        let proceeds = mul_div(rex.amount, s0, r0)?;
        if proceeds <= 0 {
            return Err(StakexError::NegligibleProceeds);
        }

        if proceeds > pool.total_unlent.amount - pool.total_lent.amount {
            return Ok(OrderOutcome {
                success: false,
                proceeds: Asset::zero(core),
                stake_change: Asset::zero(core),
            });
        }

        let current_stake_value = mul_div(balance.rex_balance.amount, s0, r0)?;
        pool.total_rex.amount = r0 - rex.amount;
        pool.total_lendable.amount = s0 - proceeds;
        pool.total_unlent = pool.total_lendable.checked_sub(pool.total_lent)?;
        self.state.put_rex_pool(&pool)?;

        let init_stake = balance.vote_stake.amount;
        balance.vote_stake.amount = current_stake_value - proceeds;
        balance.rex_balance.amount -= rex.amount;
        balance.maturities.take(rex.amount)?;

        Ok(OrderOutcome {
            success: true,
            proceeds: Asset::new(proceeds, core),
            stake_change: Asset::new(balance.vote_stake.amount - init_stake, core),
        })
    }

    /// Collect a filled order, move proceeds into the fund and refresh the
    /// owner's vote. Returns the shares still waiting in an open order.
    fn update_rex_account(
        &mut self,
        owner: AccountName,
        proceeds: Asset,
        delta_stake: Asset,
        force_vote_update: bool,
    ) -> Result<Asset, StakexError> {
        let mut to_fund = proceeds.amount;
        let mut delta = delta_stake.amount;
        let mut in_sell_order = 0;
        match self.state.rex_order(owner)? {
            Some(order) if !order.is_open => {
                to_fund += order.proceeds.amount;
                delta += order.stake_change.amount;
                self.state.remove_rex_order(owner)?;
                debug!(%owner, proceeds = %order.proceeds, "collected filled sell order");
            }
            Some(order) => in_sell_order = order.rex_requested.amount,
            None => {}
        }

        self.transfer_to_fund(owner, self.core(to_fund))?;
        if force_vote_update || delta != 0 {
            self.update_voting_power(owner, delta)?;
        }
        Ok(Asset::new(in_sell_order, REX_SYMBOL))
    }

    /// Revalue the voter's REX holding and fold the change into its stake.
    /// Returns the change in vote stake.
    pub(crate) fn update_rex_stake(&mut self, voter: AccountName) -> Result<i64, StakexError> {
        let Some(pool) = self.state.rex_pool()? else { return Ok(0) };
        let Some(mut balance) = self.state.rex_balance(voter)? else { return Ok(0) };
        if pool.total_rex.amount <= 0 {
            return Ok(0);
        }
        let init = balance.vote_stake.amount;
        balance.vote_stake.amount =
            mul_div(balance.rex_balance.amount, pool.total_lendable.amount, pool.total_rex.amount)?;
        let delta = balance.vote_stake.amount - init;
        self.state.put_rex_balance(&balance)?;

        if delta != 0 {
            if let Some(mut info) = self.state.voter(voter)? {
                info.staked += delta;
                if info.staked < 0 {
                    return Err(StakexError::InsufficientStake("voting"));
                }
                self.state.put_voter(&info)?;
            }
        }
        Ok(delta)
    }

    pub(crate) fn check_voting_requirement(&self, owner: AccountName) -> Result<(), StakexError> {
        let voter = self.state.voter(owner)?.ok_or(StakexError::VotingRequirementNotMet)?;
        if voter.proxy.is_none() && voter.producers.len() < self.params.min_producers_for_rex {
            return Err(StakexError::VotingRequirementNotMet);
        }
        Ok(())
    }

    // ── Funds ────────────────────────────────────────────────────────────────

    pub(crate) fn deposit(&mut self, owner: AccountName, amount: Asset) -> Result<(), StakexError> {
        self.require_positive_core(&amount)?;
        self.transfer(owner, REX_ACCOUNT, amount, "deposit to REX fund");
        self.transfer_to_fund(owner, amount)
    }

    pub(crate) fn withdraw(&mut self, owner: AccountName, amount: Asset) -> Result<(), StakexError> {
        self.require_positive_core(&amount)?;
        self.update_rex_account(owner, self.core(0), self.core(0), false)?;
        self.transfer_from_fund(owner, amount)?;
        self.transfer(REX_ACCOUNT, owner, amount, "withdraw from REX fund");
        Ok(())
    }

    // ── Buying and selling ───────────────────────────────────────────────────

    pub(crate) fn buy_rex(&mut self, from: AccountName, amount: Asset) -> Result<(), StakexError> {
        self.require_positive_core(&amount)?;
        self.check_voting_requirement(from)?;
        self.transfer_from_fund(from, amount)?;

        let rex_received = self.add_to_rex_pool(amount)?;
        let delta_stake = self.add_to_rex_balance(from, amount, rex_received)?;
        self.run_rex(self.params.rex_opportunistic_max)?;
        self.update_rex_account(from, self.core(0), self.core(delta_stake), false)?;

        self.emit(ActionEvent::BuyResult { rex_received });
        info!(%from, paid = %amount, received = %rex_received, "bought REX");
        Ok(())
    }

    pub(crate) fn unstake_to_rex(
        &mut self,
        owner: AccountName,
        receiver: AccountName,
        from_net: Asset,
        from_cpu: Asset,
    ) -> Result<(), StakexError> {
        self.require_core(&from_net)?;
        self.require_core(&from_cpu)?;
        if from_net.amount < 0 || from_cpu.amount < 0 || from_net.amount + from_cpu.amount <= 0 {
            return Err(StakexError::InvalidAmount("must unstake a positive amount to buy REX"));
        }
        self.check_voting_requirement(owner)?;

        let mut delegation = self
            .state
            .delegation(owner, receiver)?
            .ok_or(StakexError::DelegationNotFound)?;
        if delegation.net_weight.amount < from_net.amount {
            return Err(StakexError::InsufficientStake("amount exceeds tokens staked for net"));
        }
        if delegation.cpu_weight.amount < from_cpu.amount {
            return Err(StakexError::InsufficientStake("amount exceeds tokens staked for cpu"));
        }
        delegation.net_weight = delegation.net_weight.checked_sub(from_net)?;
        delegation.cpu_weight = delegation.cpu_weight.checked_sub(from_cpu)?;
        self.state.put_delegation(&delegation)?;
        self.adjust_resource_weights(receiver, -from_net.amount, -from_cpu.amount)?;

        let payment = from_net.checked_add(from_cpu)?;
        self.transfer(STAKE_ACCOUNT, REX_ACCOUNT, payment, "buy REX with staked tokens");

        let rex_received = self.add_to_rex_pool(payment)?;
        let delta_stake = self.add_to_rex_balance(owner, payment, rex_received)?;
        self.run_rex(self.params.rex_opportunistic_max)?;
        self.update_rex_account(owner, self.core(0), self.core(delta_stake - payment.amount), true)?;

        self.emit(ActionEvent::BuyResult { rex_received });
        info!(%owner, %receiver, paid = %payment, received = %rex_received, "bought REX with stake");
        Ok(())
    }

    pub(crate) fn sell_rex(&mut self, from: AccountName, rex: Asset) -> Result<(), StakexError> {
        self.run_rex(self.params.rex_opportunistic_max)?;

        let mut balance = self.state.rex_balance(from)?.ok_or(StakexError::RexBalanceNotFound(from))?;
        Self::check_rex_asset(&rex)?;
        balance.maturities.process(self.now);
        if rex.amount > balance.maturities.matured {
            return Err(StakexError::InsufficientMaturedShares {
                requested: rex.amount,
                matured: balance.maturities.matured,
            });
        }

        let outcome = self.fill_rex_order(&mut balance, rex)?;
        self.state.put_rex_balance(&balance)?;
        let mut pending = self.update_rex_account(from, outcome.proceeds, outcome.stake_change, false)?;

        if !outcome.success {
            let order = match self.state.rex_order(from)? {
                Some(mut order) => {
                    order.rex_requested = order.rex_requested.checked_add(rex)?;
                    order
                }
                None => RexOrder {
                    owner: from,
                    rex_requested: rex,
                    proceeds: self.core(0),
                    stake_change: self.core(0),
                    order_time: self.now,
                    is_open: true,
                },
            };
            pending = order.rex_requested;
            self.state.put_rex_order(&order)?;
            info!(%from, %rex, queued = %pending, "sell order queued");
        }

        let matured = self
            .state
            .rex_balance(from)?
            .map(|b| b.maturities.matured)
            .unwrap_or(0);
        if pending.amount > matured {
            return Err(StakexError::InsufficientMaturedShares { requested: pending.amount, matured });
        }

        if outcome.success {
            self.emit(ActionEvent::SellResult { proceeds: outcome.proceeds });
            info!(%from, %rex, proceeds = %outcome.proceeds, "sold REX");
        }
        Ok(())
    }

    pub(crate) fn cancel_rex_order(&mut self, owner: AccountName) -> Result<(), StakexError> {
        let order = self.state.rex_order(owner)?.ok_or(StakexError::OrderNotFound(owner))?;
        if !order.is_open {
            return Err(StakexError::OrderAlreadyFilled);
        }
        self.state.remove_rex_order(owner)?;
        info!(%owner, rex = %order.rex_requested, "sell order cancelled");
        Ok(())
    }

    // ── Holdings ─────────────────────────────────────────────────────────────

    pub(crate) fn update_rex(&mut self, owner: AccountName) -> Result<(), StakexError> {
        self.run_rex(self.params.rex_opportunistic_max)?;
        let pool = self.pool()?;
        let mut balance = self.state.rex_balance(owner)?.ok_or(StakexError::RexBalanceNotFound(owner))?;

        let init = balance.vote_stake.amount;
        balance.vote_stake.amount = if pool.total_rex.amount > 0 {
            mul_div(balance.rex_balance.amount, pool.total_lendable.amount, pool.total_rex.amount)?
        } else {
            0
        };
        let delta = balance.vote_stake.amount - init;
        balance.maturities.process(self.now);
        self.state.put_rex_balance(&balance)?;
        self.update_rex_account(owner, self.core(0), self.core(delta), true)?;
        Ok(())
    }

    pub(crate) fn consolidate(&mut self, owner: AccountName) -> Result<(), StakexError> {
        self.run_rex(self.params.rex_opportunistic_max)?;
        if self.state.rex_balance(owner)?.is_none() {
            return Err(StakexError::RexBalanceNotFound(owner));
        }
        self.update_rex_account(owner, self.core(0), self.core(0), false)?;
        let mut balance = self.state.rex_balance(owner)?.ok_or(StakexError::RexBalanceNotFound(owner))?;
        balance.maturities.process(self.now);
        self.state.put_rex_balance(&balance)
    }

    pub(crate) fn move_to_savings(&mut self, owner: AccountName, rex: Asset) -> Result<(), StakexError> {
        self.run_rex(self.params.rex_opportunistic_max)?;
        if self.state.rex_balance(owner)?.is_none() {
            return Err(StakexError::RexBalanceNotFound(owner));
        }
        Self::check_rex_asset(&rex)?;
        let in_sell_order = self.update_rex_account(owner, self.core(0), self.core(0), false)?;

        let mut balance = self.state.rex_balance(owner)?.ok_or(StakexError::RexBalanceNotFound(owner))?;
        balance.maturities.process(self.now);
        let committed = rex.amount + in_sell_order.amount + balance.maturities.savings;
        if committed > balance.rex_balance.amount {
            return Err(StakexError::InsufficientShares {
                requested: rex.amount,
                available: balance.rex_balance.amount - in_sell_order.amount - balance.maturities.savings,
            });
        }
        balance.maturities.move_to_savings(rex.amount)?;
        self.state.put_rex_balance(&balance)
    }

    pub(crate) fn move_from_savings(&mut self, owner: AccountName, rex: Asset) -> Result<(), StakexError> {
        self.run_rex(self.params.rex_opportunistic_max)?;
        let mut balance = self.state.rex_balance(owner)?.ok_or(StakexError::RexBalanceNotFound(owner))?;
        Self::check_rex_asset(&rex)?;
        balance.maturities.process(self.now);
        balance
            .maturities
            .move_from_savings(rex.amount, maturity_date(self.now, self.params.rex_maturity_days))?;
        self.state.put_rex_balance(&balance)?;
        self.update_rex_account(owner, self.core(0), self.core(0), false)?;
        Ok(())
    }

    pub(crate) fn close_rex(&mut self, owner: AccountName) -> Result<(), StakexError> {
        if self.state.rex_pool()?.is_some() {
            self.run_rex(self.params.rex_opportunistic_max)?;
        }
        self.update_rex_account(owner, self.core(0), self.core(0), false)?;

        let has_loans = !self.state.loans_of(ResourceKind::Cpu, owner)?.is_empty()
            || !self.state.loans_of(ResourceKind::Net, owner)?.is_empty();
        if let Some(fund) = self.state.rex_fund(owner)? {
            if fund.balance.amount == 0 && !has_loans {
                self.state.remove_rex_fund(owner);
            }
        }

        if let Some(balance) = self.state.rex_balance(owner)? {
            if balance.rex_balance.amount != 0 {
                return Err(StakexError::RemainingRexBalance);
            }
            self.state.remove_rex_balance(owner);
        }
        info!(%owner, "closed REX account");
        Ok(())
    }

    pub(crate) fn set_rex(&mut self, balance: Asset) -> Result<(), StakexError> {
        self.require_positive_core(&balance)?;
        let mut pool = self.pool()?;
        pool.total_rent = balance;
        self.state.put_rex_pool(&pool)?;
        info!(total_rent = %balance, "rent connector reset");
        Ok(())
    }

    // ── Loans ────────────────────────────────────────────────────────────────

    fn add_loan_to_rex_pool(&mut self, payment: Asset, rented: i64, new_loan: bool) -> Result<(), StakexError> {
        let mut pool = self.pool()?;
        pool.total_rent = pool.total_rent.checked_add(payment)?;
        pool.total_unlent.amount -= rented;
        pool.total_lent.amount += rented;
        pool.total_unlent = pool.total_unlent.checked_add(payment)?;
        pool.total_lendable = pool.total_unlent.checked_add(pool.total_lent)?;
        if new_loan {
            pool.loan_num += 1;
        }
        if pool.total_unlent.amount < 0 {
            return Err(StakexError::StateInconsistency("loan exceeds unlent pool balance".into()));
        }
        self.state.put_rex_pool(&pool)
    }

    fn remove_loan_from_rex_pool(&mut self, loan: &RexLoan) -> Result<(), StakexError> {
        let mut pool = self.pool()?;
        let released_rent =
            get_bancor_output(pool.total_unlent.amount, pool.total_rent.amount, loan.total_staked.amount)?;
        pool.total_rent.amount -= released_rent;
        pool.total_unlent.amount += loan.total_staked.amount;
        pool.total_lent.amount -= loan.total_staked.amount;
        pool.total_lendable = pool.total_unlent.checked_add(pool.total_lent)?;
        self.state.put_rex_pool(&pool)
    }

    fn owned_loan(&self, kind: ResourceKind, from: AccountName, loan_num: u64) -> Result<RexLoan, StakexError> {
        let loan = self
            .state
            .rex_loan(loan_num)?
            .filter(|l| l.kind == kind)
            .ok_or(StakexError::LoanNotFound { kind, loan_num })?;
        if loan.from != from {
            return Err(StakexError::NotLoanOwner);
        }
        if loan.expiration <= self.now {
            return Err(StakexError::LoanExpired);
        }
        Ok(loan)
    }

    pub(crate) fn rent(
        &mut self,
        kind: ResourceKind,
        from: AccountName,
        receiver: AccountName,
        payment: Asset,
        fund: Asset,
    ) -> Result<(), StakexError> {
        self.run_rex(self.params.rex_opportunistic_max)?;
        if !self.rex_loans_available()? {
            return Err(StakexError::RentalUnavailable("rex loans are currently not available"));
        }
        self.require_core(&payment)?;
        self.require_core(&fund)?;
        if payment.amount <= 0 || fund.amount < 0 {
            return Err(StakexError::InvalidAmount("must use positive asset amount"));
        }

        self.update_rex_account(from, self.core(0), self.core(0), false)?;
        self.transfer_from_fund(from, payment.checked_add(fund)?)?;

        let pool = self.pool()?;
        let rented = get_bancor_output(pool.total_rent.amount, pool.total_unlent.amount, payment.amount)?;
        if payment.amount >= rented {
            return Err(StakexError::RentalUnavailable("loan price does not favor renting"));
        }

        let existing = self
            .state
            .loans_of(kind, from)?
            .into_iter()
            .find(|l| l.receiver == receiver && l.expiration > self.now);
        let loan = match existing {
            Some(mut loan) => {
                self.add_loan_to_rex_pool(payment, rented, false)?;
                loan.payment = loan.payment.checked_add(payment)?;
                loan.balance = loan.balance.checked_add(fund)?;
                loan.total_staked.amount += rented;
                loan.expiration = self.now + self.params.loan_term_secs;
                loan
            }
            None => {
                self.add_loan_to_rex_pool(payment, rented, true)?;
                RexLoan {
                    kind,
                    loan_num: self.pool()?.loan_num,
                    from,
                    receiver,
                    payment,
                    balance: fund,
                    total_staked: self.core(rented),
                    expiration: self.now + self.params.loan_term_secs,
                }
            }
        };
        self.state.put_rex_loan(&loan)?;
        self.adjust_loan_weight(receiver, kind, rented)?;

        self.emit(ActionEvent::RentResult { loan_num: loan.loan_num, rented_tokens: self.core(rented) });
        info!(%kind, %from, %receiver, %payment, rented, loan_num = loan.loan_num, "rented resources");
        Ok(())
    }

    pub(crate) fn fund_loan(
        &mut self,
        kind: ResourceKind,
        from: AccountName,
        loan_num: u64,
        payment: Asset,
    ) -> Result<(), StakexError> {
        self.require_core(&payment)?;
        let mut loan = self.owned_loan(kind, from, loan_num)?;
        self.transfer_from_fund(from, payment)?;
        loan.balance = loan.balance.checked_add(payment)?;
        self.state.put_rex_loan(&loan)
    }

    pub(crate) fn defund_loan(
        &mut self,
        kind: ResourceKind,
        from: AccountName,
        loan_num: u64,
        amount: Asset,
    ) -> Result<(), StakexError> {
        self.require_positive_core(&amount)?;
        let mut loan = self.owned_loan(kind, from, loan_num)?;
        if loan.balance.amount < amount.amount {
            return Err(StakexError::InsufficientFunds { need: amount, have: loan.balance });
        }
        let remaining = loan.balance.checked_sub(amount)?;
        if remaining.amount < loan.payment.amount {
            return Err(StakexError::LoanUnderfunded { remaining, required: loan.payment });
        }
        loan.balance = remaining;
        self.state.put_rex_loan(&loan)?;
        self.transfer_to_fund(from, amount)
    }

    fn adjust_loan_weight(&mut self, receiver: AccountName, kind: ResourceKind, delta: i64) -> Result<(), StakexError> {
        match kind {
            ResourceKind::Net => self.adjust_resource_weights(receiver, delta, 0),
            ResourceKind::Cpu => self.adjust_resource_weights(receiver, 0, delta),
        }
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    fn process_expired_loans(&mut self, kind: ResourceKind, max: u16) -> Result<(), StakexError> {
        for _ in 0..max {
            let Some(mut loan) = self.state.earliest_loan(kind)? else { break };
            if loan.expiration > self.now {
                break;
            }
            self.remove_loan_from_rex_pool(&loan)?;

            if self.rex_loans_available()? && loan.payment.amount <= loan.balance.amount {
                let pool = self.pool()?;
                let rented =
                    get_bancor_output(pool.total_rent.amount, pool.total_unlent.amount, loan.payment.amount)?;
                let delta = rented - loan.total_staked.amount;
                loan.balance = loan.balance.checked_sub(loan.payment)?;
                loan.total_staked.amount = rented;
                loan.expiration += self.params.loan_term_secs;
                self.state.put_rex_loan(&loan)?;
                self.add_loan_to_rex_pool(loan.payment, rented, false)?;
                self.adjust_loan_weight(loan.receiver, kind, delta)?;
                debug!(%kind, loan_num = loan.loan_num, rented, "loan renewed");
            } else {
                let delta = -loan.total_staked.amount;
                self.transfer_to_fund(loan.from, loan.balance)?;
                self.state.remove_rex_loan(loan.loan_num)?;
                self.adjust_loan_weight(loan.receiver, kind, delta)?;
                info!(%kind, loan_num = loan.loan_num, refunded = %loan.balance, "loan closed");
            }
        }
        Ok(())
    }

    /// Bounded maintenance: route auction proceeds into the pool, settle up
    /// to `max` expired loans per book, then fill up to `max` queued sell
    /// orders oldest first, stopping at the first that cannot be filled.
    pub(crate) fn run_rex(&mut self, max: u16) -> Result<(), StakexError> {
        if max == 0 {
            return Ok(());
        }
        let Some(mut pool) = self.state.rex_pool()? else { return Ok(()) };

        if pool.namebid_proceeds.amount > 0 {
            let proceeds = pool.namebid_proceeds;
            pool.namebid_proceeds.amount = 0;
            self.state.put_rex_pool(&pool)?;
            self.channel_to_rex(NAMES_ACCOUNT, proceeds)?;
        }

        self.process_expired_loans(ResourceKind::Cpu, max)?;
        self.process_expired_loans(ResourceKind::Net, max)?;

        for _ in 0..max {
            let Some(mut order) = self.state.orders_by_time(1)?.into_iter().next() else { break };
            if !order.is_open {
                break;
            }
            let mut balance = self
                .state
                .rex_balance(order.owner)?
                .ok_or_else(|| StakexError::missing("rex balance of queued order"))?;
            let outcome = self.fill_rex_order(&mut balance, order.rex_requested)?;
            if !outcome.success {
                break;
            }
            self.state.put_rex_balance(&balance)?;
            order.proceeds = outcome.proceeds;
            order.stake_change = outcome.stake_change;
            order.is_open = false;
            self.state.put_rex_order(&order)?;
            self.emit(ActionEvent::OrderResult { owner: order.owner, proceeds: outcome.proceeds });
            info!(owner = %order.owner, proceeds = %outcome.proceeds, "queued sell order filled");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_div_uses_wide_intermediate() {
        assert_eq!(mul_div(i64::MAX / 2, 4, 8).unwrap(), i64::MAX / 4);
        assert!(mul_div(1, 1, 0).is_err());
        assert!(mul_div(i64::MAX, i64::MAX, 1).is_err());
    }
}
