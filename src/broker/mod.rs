//! Scatter-gather loan brokering on top of the durable runtime.
//!
//! A request is scored by the credit bureau, quoted by every configured
//! lender in parallel, and the ordered outcomes are published to an
//! `AggregateSink` under the request id.
pub mod activities;
pub mod aggregator;
pub mod config;
pub mod error;
pub mod gateway;
pub mod intake;
pub mod model;
pub mod simulator;
pub mod sink;
pub mod workflow;

pub use config::{BrokerConfig, ConfigError, LenderConfig};
pub use error::{BrokerError, GatewayError, OrchestrationFault, SinkError};
pub use gateway::{HttpGateway, Participant, ParticipantGateway};
pub use intake::LoanBroker;
pub use model::{LoanRequest, QuoteAggregate, QuoteOutcome, QuoteStatus};
pub use simulator::{LenderPolicy, SimulatedParticipants};
pub use sink::{AggregateSink, InMemoryAggregateSink};
