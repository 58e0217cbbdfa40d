//! Credit ledger service.
//!
//! This crate hosts the ledger engine and its Stripe plumbing:
//!
//! - [`CreditLedger`] - balances, charging, daily history and smart recharge
//! - [`SubscriptionSynchronizer`] - applies Stripe webhook events to the store
//! - [`BroadcastHub`] - fans workspace events out to connected listeners
//! - An HTTP surface for health checks and Stripe webhook ingress
//!
//! Storage lives behind the `credit_ledger_store::Store` trait; the domain
//! model lives in `credit_ledger_core`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers stay async for the router

pub mod broadcast;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod payment;
pub mod routes;
pub mod state;
pub mod stripe;
pub mod sync;

pub use broadcast::{BroadcastHub, Broadcaster, WorkspaceEvent};
pub use config::ServiceConfig;
pub use error::ApiError;
pub use ledger::{ChargeReceipt, CreditLedger, RechargeOutcome, RechargePricing};
pub use payment::{InvoiceRequest, PaymentGateway};
pub use routes::create_router;
pub use state::AppState;
pub use stripe::{StripeClient, StripeError};
pub use sync::{SubscriptionSynchronizer, SyncOutcome};
