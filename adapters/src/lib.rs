pub mod attestation;
pub mod bank_rail;
pub mod breaker;
pub mod brokerage;
pub mod custodian;
pub mod error;
pub mod http;
pub mod rate_limit;
pub mod secret;

pub use attestation::AttestationAdapter;
pub use bank_rail::BankRailAdapter;
pub use brokerage::BrokerageAdapter;
pub use custodian::CustodianAdapter;
pub use error::AdapterError;
pub use http::{HttpAdapter, HttpAdapterConfig};
