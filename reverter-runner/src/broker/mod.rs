//! Brokerage access: transport, retry policy, client and typed endpoints.

pub mod api;
pub mod client;
pub mod error;
pub mod retry;
pub mod transport;

pub use api::{Broker, CashBalance, Exchange, Instrument, OrderAck, TimeEvent, WorkingSchedule};
pub use client::ApiClient;
pub use error::BrokerError;
pub use retry::{parse_retry_after, CallOutcome, RetryPolicy, MAX_RETRY_AFTER};
pub use transport::{
    authorization_value, ApiRequest, HttpTransport, Method, RawResponse, Transport, TransportError,
};
