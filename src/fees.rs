//! Fee policy.
//!
//! A quote splits what the user pays into principal, fee and profit, so
//! `total charged = principal + fee` and `profit <= fee` hold for every
//! kind. Defaults: transfers are charged ₦30 on top (₦10 service + ₦20
//! provider cost, profit ₦10); airtime carries a 3% commission inside
//! the face value (provider bills face − 3%, the commission is all
//! profit).

use crate::ledger::TxKind;
use crate::money::Amount;

/// Fee and profit for a single transaction.
///
/// The ledger debits `principal + fee`; the profit ledger records
/// `profit`, which never exceeds `fee`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeQuote {
    /// What the provider disburses (or bills us) on the user's behalf
    pub principal: Amount,
    /// Charged to the user on top of the principal
    pub fee: Amount,
    /// Share of `fee` retained after provider cost
    pub profit: Amount,
}

impl FeeQuote {
    /// Total the user's balance is reduced by.
    pub fn total(&self) -> Amount {
        self.principal.checked_add(self.fee).expect("quote overflow")
    }
}

/// Policy table keyed by transaction kind.
#[derive(Debug, Clone)]
pub struct FeePolicy {
    transfer_service_fee: Amount,
    transfer_provider_cost: Amount,
    airtime_commission_percent: u32,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            transfer_service_fee: Amount::from_naira(10).expect("const"),
            transfer_provider_cost: Amount::from_naira(20).expect("const"),
            airtime_commission_percent: 3,
        }
    }
}

impl FeePolicy {
    pub fn new(
        transfer_service_fee: Amount,
        transfer_provider_cost: Amount,
        airtime_commission_percent: u32,
    ) -> Self {
        Self {
            transfer_service_fee,
            transfer_provider_cost,
            airtime_commission_percent,
        }
    }

    /// Quote a transaction of `kind` for `amount` (the amount the user
    /// asked for: transfer principal, or airtime face value).
    pub fn quote(&self, kind: TxKind, amount: Amount) -> FeeQuote {
        match kind {
            TxKind::Transfer => {
                let fee = self
                    .transfer_service_fee
                    .checked_add(self.transfer_provider_cost)
                    .expect("fee table values are small");
                FeeQuote {
                    principal: amount,
                    fee,
                    profit: self.transfer_service_fee,
                }
            }
            TxKind::Airtime => {
                // Commission sits inside the face value: the user pays
                // face, the provider bills face - commission.
                let commission = amount.percent(self.airtime_commission_percent);
                FeeQuote {
                    principal: amount.checked_sub(commission).unwrap_or(Amount::ZERO),
                    fee: commission,
                    profit: commission,
                }
            }
            // Deposits carry no user fee in this engine
            TxKind::Credit => FeeQuote {
                principal: amount,
                fee: Amount::ZERO,
                profit: Amount::ZERO,
            },
        }
    }
}
