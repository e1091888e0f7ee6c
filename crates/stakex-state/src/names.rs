use stakex_core::constants::{NAMES_ACCOUNT, NAME_BID_INCREMENT_DIVISOR};
use stakex_core::{AccountName, Asset, StakexError};
use tracing::info;

use crate::engine::ApplyContext;
use crate::records::{BidRefund, NameBid};

impl ApplyContext<'_> {
    pub(crate) fn bid_name(&mut self, bidder: AccountName, newname: AccountName, bid: Asset) -> Result<(), StakexError> {
        if newname.is_empty() {
            return Err(StakexError::InvalidNameBid("the empty name is not a valid account name to bid on"));
        }
        if newname.suffix() != newname {
            return Err(StakexError::InvalidNameBid("you can only bid on top-level suffix"));
        }
        if newname.value() & 0xF != 0 {
            return Err(StakexError::InvalidNameBid("13 character names are not valid account names to bid on"));
        }
        if newname.value() & 0x1F0 != 0 {
            return Err(StakexError::InvalidNameBid(
                "accounts with 12 character names and no dots can be created without bidding",
            ));
        }
        self.require_core(&bid)?;
        if bid.amount <= 0 {
            return Err(StakexError::InvalidAmount("insufficient bid"));
        }

        self.transfer(bidder, NAMES_ACCOUNT, bid, &format!("bid name {newname}"));

        let record = match self.state.name_bid(newname)? {
            None => NameBid { newname, high_bidder: bidder, high_bid: bid.amount, last_bid_time: self.now },
            Some(mut current) => {
                if current.high_bid <= 0 {
                    return Err(StakexError::AuctionClosed);
                }
                if bid.amount - current.high_bid <= current.high_bid / NAME_BID_INCREMENT_DIVISOR {
                    return Err(StakexError::BidTooLow);
                }
                if current.high_bidder == bidder {
                    return Err(StakexError::AlreadyHighestBidder);
                }

                let outbid = self.core(current.high_bid);
                let refund = match self.state.bid_refund(newname, current.high_bidder)? {
                    Some(mut refund) => {
                        refund.amount = refund.amount.checked_add(outbid)?;
                        refund
                    }
                    None => BidRefund { bidder: current.high_bidder, newname, amount: outbid },
                };
                self.state.put_bid_refund(&refund)?;

                current.high_bidder = bidder;
                current.high_bid = bid.amount;
                current.last_bid_time = self.now;
                current
            }
        };
        self.state.put_name_bid(&record)?;
        info!(%bidder, %newname, %bid, "name bid placed");
        Ok(())
    }

    pub(crate) fn bid_refund(&mut self, bidder: AccountName, newname: AccountName) -> Result<(), StakexError> {
        let refund = self
            .state
            .bid_refund(newname, bidder)?
            .ok_or(StakexError::BidRefundNotFound)?;
        self.transfer(NAMES_ACCOUNT, bidder, refund.amount, &format!("refund bid on name {newname}"));
        self.state.remove_bid_refund(newname, bidder);
        Ok(())
    }

    /// Close the highest open auction once bidding has been quiet for a
    /// day and the chain has been active long enough.
    pub(crate) fn close_name_auction(&mut self) -> Result<(), StakexError> {
        let Some(mut highest) = self.state.open_bids(1)?.into_iter().next() else { return Ok(()) };
        let activated_at = self.global.thresh_activated_stake_time;
        if highest.high_bid > 0
            && self.now - highest.last_bid_time > self.params.name_close_interval_secs
            && activated_at > 0
            && self.now - activated_at > self.params.name_close_activation_delay_secs
        {
            self.global.last_name_close = self.now;
            self.channel_namebid_to_rex(highest.high_bid)?;
            highest.high_bid = -highest.high_bid;
            self.state.put_name_bid(&highest)?;
            info!(name = %highest.newname, winner = %highest.high_bidder, "name auction closed");
        }
        Ok(())
    }
}
