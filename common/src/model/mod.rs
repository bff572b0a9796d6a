pub mod allocation;
pub mod bridge;
pub mod deposit;
pub mod idempotency;
pub mod ledger;
pub mod reconciliation;
pub mod withdrawal;
pub mod worker;

pub use allocation::*;
pub use bridge::*;
pub use deposit::*;
pub use idempotency::*;
pub use ledger::*;
pub use reconciliation::*;
pub use withdrawal::*;
pub use worker::*;
