use stakex_core::constants::{
    MAX_RAM_SIZE_LIMIT, RAMFEE_ACCOUNT, RAM_ACCOUNT, RAM_FEE_DIVISOR, RAM_SYMBOL,
};
use stakex_core::{AccountName, Asset, StakexError};
use stakex_econ::get_bancor_input;
use tracing::info;

use crate::engine::ApplyContext;
use crate::records::UserResources;

/// Fee on a RAM trade, rounded up.
fn ram_fee(amount: i64) -> i64 {
    (amount + RAM_FEE_DIVISOR - 1) / RAM_FEE_DIVISOR
}

impl ApplyContext<'_> {
    pub(crate) fn buy_ram(&mut self, payer: AccountName, receiver: AccountName, quant: Asset) -> Result<(), StakexError> {
        self.require_core(&quant)?;
        if quant.amount <= 0 {
            return Err(StakexError::InvalidAmount("must purchase a positive amount"));
        }
        let fee = ram_fee(quant.amount);
        let after_fee = quant.amount - fee;
        if after_fee <= 0 {
            return Err(StakexError::InvalidRamOperation("purchase does not cover the trading fee"));
        }

        self.transfer(payer, RAM_ACCOUNT, self.core(after_fee), "buy ram");
        self.transfer(payer, RAMFEE_ACCOUNT, self.core(fee), "ram fee");
        self.channel_to_rex(RAMFEE_ACCOUNT, self.core(fee))?;

        let mut market = self.state.ram_market()?.ok_or_else(|| StakexError::missing("ram market"))?;
        let bytes_out = market.convert(self.core(after_fee), RAM_SYMBOL)?.amount;
        if bytes_out <= 0 {
            return Err(StakexError::InvalidRamOperation("must reserve a positive amount"));
        }
        self.state.put_ram_market(&market)?;

        self.global.total_ram_bytes_reserved += bytes_out as u64;
        self.global.total_ram_stake += after_fee;

        let mut res = self
            .state
            .user_resources(receiver)?
            .unwrap_or_else(|| UserResources::new(receiver, self.core_symbol()));
        res.ram_bytes += bytes_out;
        self.state.put_user_resources(&res)?;

        info!(%payer, %receiver, paid = %quant, bytes = bytes_out, "bought ram");
        Ok(())
    }

    /// Buy approximately `bytes` bytes, quoting the price at the current
    /// market and adding the trading fee.
    pub(crate) fn buy_ram_bytes(&mut self, payer: AccountName, receiver: AccountName, bytes: u32) -> Result<(), StakexError> {
        let market = self.state.ram_market()?.ok_or_else(|| StakexError::missing("ram market"))?;
        let cost = get_bancor_input(
            market.base.balance.amount,
            market.quote.balance.amount,
            i64::from(bytes),
        )?;
        let cost_plus_fee = (cost as f64 / (1.0 - 1.0 / RAM_FEE_DIVISOR as f64)) as i64;
        self.buy_ram(payer, receiver, self.core(cost_plus_fee))
    }

    pub(crate) fn sell_ram(&mut self, account: AccountName, bytes: i64) -> Result<(), StakexError> {
        if bytes <= 0 {
            return Err(StakexError::InvalidAmount("cannot sell negative byte"));
        }
        let mut res = self
            .state
            .user_resources(account)?
            .ok_or(StakexError::InvalidRamOperation("no resource row"))?;
        if res.ram_bytes < bytes {
            return Err(StakexError::InvalidRamOperation("insufficient quota"));
        }

        let mut market = self.state.ram_market()?.ok_or_else(|| StakexError::missing("ram market"))?;
        let tokens_out = market.convert(Asset::new(bytes, RAM_SYMBOL), self.core_symbol())?;
        if tokens_out.amount <= 1 {
            return Err(StakexError::InvalidRamOperation("token amount received from selling ram is too low"));
        }
        self.state.put_ram_market(&market)?;

        self.global.total_ram_bytes_reserved = self
            .global
            .total_ram_bytes_reserved
            .checked_sub(bytes as u64)
            .ok_or_else(|| StakexError::StateInconsistency("reserved ram went negative".into()))?;
        self.global.total_ram_stake -= tokens_out.amount;
        if self.global.total_ram_stake < 0 {
            return Err(StakexError::StateInconsistency("ram stake went negative".into()));
        }

        res.ram_bytes -= bytes;
        self.state.put_user_resources(&res)?;

        self.transfer(RAM_ACCOUNT, account, tokens_out, "sell ram");
        let fee = ram_fee(tokens_out.amount);
        self.transfer(account, RAMFEE_ACCOUNT, self.core(fee), "sell ram fee");
        self.channel_to_rex(RAMFEE_ACCOUNT, self.core(fee))?;

        info!(%account, bytes, received = %tokens_out, "sold ram");
        Ok(())
    }

    /// Grow the RAM supply; the new bytes enter the market's base connector.
    pub(crate) fn set_ram(&mut self, max_ram_size: u64) -> Result<(), StakexError> {
        if max_ram_size >= MAX_RAM_SIZE_LIMIT {
            return Err(StakexError::InvalidRamOperation("ram size is unrealistic"));
        }
        if max_ram_size <= self.global.total_ram_bytes_reserved {
            return Err(StakexError::InvalidRamOperation("attempt to set max below reserved"));
        }
        if max_ram_size <= self.global.max_ram_size {
            return Err(StakexError::InvalidRamOperation("ram may only be increased"));
        }

        let delta = i64::try_from(max_ram_size - self.global.max_ram_size).map_err(|_| StakexError::AmountOverflow)?;
        let mut market = self.state.ram_market()?.ok_or_else(|| StakexError::missing("ram market"))?;
        market.base.balance.amount += delta;
        self.state.put_ram_market(&market)?;

        self.global.max_ram_size = max_ram_size;
        info!(max_ram_size, added = delta, "ram supply increased");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_rounds_up() {
        assert_eq!(ram_fee(200), 1);
        assert_eq!(ram_fee(201), 2);
        assert_eq!(ram_fee(1), 1);
    }
}
