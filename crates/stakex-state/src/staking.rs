use stakex_core::constants::STAKE_ACCOUNT;
use stakex_core::{AccountName, Asset, StakexError};
use tracing::info;

use crate::engine::ApplyContext;
use crate::records::{DelegatedBandwidth, RefundRequest, UserResources};

impl ApplyContext<'_> {
    /// Change the receiver's net and cpu weights; the row disappears once empty.
    pub(crate) fn adjust_resource_weights(&mut self, receiver: AccountName, net: i64, cpu: i64) -> Result<(), StakexError> {
        if net == 0 && cpu == 0 {
            return Ok(());
        }
        let mut res = self
            .state
            .user_resources(receiver)?
            .unwrap_or_else(|| UserResources::new(receiver, self.core_symbol()));
        res.net_weight.amount += net;
        res.cpu_weight.amount += cpu;
        if res.net_weight.amount < 0 {
            return Err(StakexError::InsufficientStake("insufficient staked net bandwidth"));
        }
        if res.cpu_weight.amount < 0 {
            return Err(StakexError::InsufficientStake("insufficient staked cpu bandwidth"));
        }
        self.state.put_user_resources(&res)
    }

    fn change_bw(
        &mut self,
        payer: AccountName,
        receiver: AccountName,
        net_delta: Asset,
        cpu_delta: Asset,
        transfer: bool,
    ) -> Result<(), StakexError> {
        self.require_core(&net_delta)?;
        self.require_core(&cpu_delta)?;
        let (net, cpu) = (net_delta.amount, cpu_delta.amount);
        if net == 0 && cpu == 0 {
            return Err(StakexError::InvalidAmount("should stake non-zero amount"));
        }
        if (net + cpu).abs() < net.abs().max(cpu.abs()) {
            return Err(StakexError::InvalidAmount("net and cpu deltas cannot be opposite signs"));
        }

        // A transferred stake is owned by the receiver from here on.
        let from = if transfer { receiver } else { payer };

        let mut delegation = self.state.delegation(from, receiver)?.unwrap_or_else(|| DelegatedBandwidth {
            from,
            to: receiver,
            net_weight: self.core(0),
            cpu_weight: self.core(0),
        });
        delegation.net_weight.amount += net;
        delegation.cpu_weight.amount += cpu;
        if delegation.net_weight.amount < 0 {
            return Err(StakexError::InsufficientStake("insufficient staked net bandwidth"));
        }
        if delegation.cpu_weight.amount < 0 {
            return Err(StakexError::InsufficientStake("insufficient staked cpu bandwidth"));
        }
        self.state.put_delegation(&delegation)?;
        self.adjust_resource_weights(receiver, net, cpu)?;

        // Unstaked tokens wait in a refund request; staking to self draws
        // on a pending refund before taking new tokens.
        let mut net_balance = net;
        let mut cpu_balance = cpu;
        let is_undelegating = net + cpu < 0;
        let is_delegating_to_self = !transfer && from == receiver;
        if is_delegating_to_self || is_undelegating {
            match self.state.refund_request(from)? {
                Some(mut req) => {
                    if net_balance < 0 || cpu_balance < 0 {
                        req.request_time = self.now;
                    }
                    req.net_amount.amount -= net_balance;
                    if req.net_amount.amount < 0 {
                        net_balance = -req.net_amount.amount;
                        req.net_amount.amount = 0;
                    } else {
                        net_balance = 0;
                    }
                    req.cpu_amount.amount -= cpu_balance;
                    if req.cpu_amount.amount < 0 {
                        cpu_balance = -req.cpu_amount.amount;
                        req.cpu_amount.amount = 0;
                    } else {
                        cpu_balance = 0;
                    }
                    if req.is_empty() {
                        self.state.remove_refund_request(from);
                    } else {
                        self.state.put_refund_request(&req)?;
                    }
                }
                None if net_balance < 0 || cpu_balance < 0 => {
                    let mut req = RefundRequest {
                        owner: from,
                        request_time: self.now,
                        net_amount: self.core(0),
                        cpu_amount: self.core(0),
                    };
                    if net_balance < 0 {
                        req.net_amount.amount = -net_balance;
                        net_balance = 0;
                    }
                    if cpu_balance < 0 {
                        req.cpu_amount.amount = -cpu_balance;
                        cpu_balance = 0;
                    }
                    self.state.put_refund_request(&req)?;
                }
                None => {}
            }
        }

        let to_stake = net_balance + cpu_balance;
        if to_stake > 0 {
            self.transfer(payer, STAKE_ACCOUNT, self.core(to_stake), "stake bandwidth");
        }

        self.update_voting_power(from, net + cpu)
    }

    pub(crate) fn delegate_bw(
        &mut self,
        from: AccountName,
        receiver: AccountName,
        stake_net: Asset,
        stake_cpu: Asset,
        transfer: bool,
    ) -> Result<(), StakexError> {
        if stake_net.amount < 0 || stake_cpu.amount < 0 {
            return Err(StakexError::InvalidAmount("must stake a positive amount"));
        }
        if stake_net.amount + stake_cpu.amount <= 0 {
            return Err(StakexError::InvalidAmount("must stake a positive amount"));
        }
        if transfer && from == receiver {
            return Err(StakexError::InvalidAmount("cannot use transfer flag if delegating to self"));
        }
        self.change_bw(from, receiver, stake_net, stake_cpu, transfer)?;
        info!(%from, %receiver, net = %stake_net, cpu = %stake_cpu, transfer, "bandwidth delegated");
        Ok(())
    }

    pub(crate) fn undelegate_bw(
        &mut self,
        from: AccountName,
        receiver: AccountName,
        unstake_net: Asset,
        unstake_cpu: Asset,
    ) -> Result<(), StakexError> {
        if unstake_net.amount < 0 || unstake_cpu.amount < 0 {
            return Err(StakexError::InvalidAmount("must unstake a positive amount"));
        }
        if unstake_net.amount + unstake_cpu.amount <= 0 {
            return Err(StakexError::InvalidAmount("must unstake a positive amount"));
        }
        self.require_activated()?;
        self.change_bw(from, receiver, unstake_net.checked_neg()?, unstake_cpu.checked_neg()?, false)?;
        info!(%from, %receiver, net = %unstake_net, cpu = %unstake_cpu, "bandwidth undelegated");
        Ok(())
    }

    pub(crate) fn refund(&mut self, owner: AccountName) -> Result<(), StakexError> {
        let req = self.state.refund_request(owner)?.ok_or(StakexError::RefundNotFound)?;
        let available_at = req.request_time + self.params.refund_delay_secs;
        if available_at > self.now {
            return Err(StakexError::RefundNotDue { available_at });
        }
        let total = req.net_amount.checked_add(req.cpu_amount)?;
        self.transfer(STAKE_ACCOUNT, owner, total, "unstake");
        self.state.remove_refund_request(owner);
        info!(%owner, amount = %total, "stake refunded");
        Ok(())
    }
}
