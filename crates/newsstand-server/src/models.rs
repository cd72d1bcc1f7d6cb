//! Database models for the settlement engine.

pub mod account;
pub mod download_credential;
pub mod earnings_ledger;
pub mod membership;
pub mod order;
pub mod product;
pub mod withdrawal;

pub use account::{Account, BankDetails, NewAccount};
pub use download_credential::DownloadCredential;
pub use earnings_ledger::{LedgerEntry, LedgerEntryType, NewLedgerEntry};
pub use membership::{Membership, MembershipAdvantage};
pub use order::{NewOrder, Order, OrderKind, OrderStatus, PaymentMethod, ORDER_COLUMNS};
pub use product::Product;
pub use withdrawal::{
    BalanceEffect, NewWithdrawalRequest, WithdrawalRequest, WithdrawalStatus, WITHDRAWAL_COLUMNS,
};
