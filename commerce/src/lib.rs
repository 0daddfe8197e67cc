// commerce/src/lib.rs

//! Order and payment orchestration on top of `orderflow`.
//!
//! Checkout, cancellation, refund and gateway reconciliation each run as a
//! registered pipeline inside one store transaction. The store and the
//! payment gateways are seams: `store::Store` and `gateway::PaymentGateway`.

pub mod compensation;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod models;
pub mod pipelines;
pub mod service;
pub mod store;
pub mod telemetry;

pub use compensation::{GatewayCompensator, PaymentCompensator};
pub use config::{CommerceConfig, DatabaseConfig, PaymentRouting};
pub use errors::{CommerceError, Result};
pub use gateway::{GatewayPaymentStatus, GatewayRegistry, IntentHandle, PaymentGateway, SimulatedGateway};
pub use pipelines::contexts::AppliedDiscount;
pub use pipelines::ReconcileOutcome;
pub use service::{CheckoutReceipt, CheckoutRequest, OrderService, ReversalReceipt};
pub use store::{MemoryStore, PgStore, Store, StoreTx, TxHandle};
