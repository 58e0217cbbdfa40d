//! Stripe integration: the production [`crate::payment::PaymentGateway`] and
//! the webhook payload types consumed by the synchronizer.

pub mod client;
pub mod types;

pub use client::{StripeClient, StripeError};
pub use types::*;
