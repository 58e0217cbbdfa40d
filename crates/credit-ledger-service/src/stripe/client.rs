//! Stripe API client implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};

use credit_ledger_core::LedgerError;

use super::types::{
    Customer, Invoice, PaymentMethod, Price, StripeErrorResponse, StripeList, StripeSubscription,
};
use crate::payment::{InvoiceRequest, PaymentGateway};

/// Error type for Stripe operations.
#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stripe API returned an error.
    #[error("Stripe API error: {error_type} - {message}")]
    Api {
        /// Error type.
        error_type: String,
        /// Error message.
        message: String,
        /// Error code.
        code: Option<String>,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<StripeError> for LedgerError {
    fn from(err: StripeError) -> Self {
        Self::ExternalService {
            service: "stripe".into(),
            message: err.to_string(),
        }
    }
}

/// Stripe API client.
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl StripeClient {
    /// Stripe API base URL.
    pub const BASE_URL: &'static str = "https://api.stripe.com/v1";

    /// Create a new Stripe client.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Stripe secret API key (`sk_test_...` or `sk_live_...`)
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    ///
    /// Returns `StripeError::Configuration` if the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, StripeError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StripeError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: Self::BASE_URL.to_string(),
        })
    }

    /// Point the client at another API root (a mock server in tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
    }

    fn post(&self, path: &str, idempotency_key: Option<&str>) -> RequestBuilder {
        let request = self
            .client
            .post(format!("{}{path}", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None);

        match idempotency_key {
            Some(key) => request.header("Idempotency-Key", key),
            None => request,
        }
    }

    /// Get a customer by ID.
    pub async fn get_customer(&self, customer_id: &str) -> Result<Customer, StripeError> {
        let response = self.get(&format!("/customers/{customer_id}")).send().await?;
        Self::handle_response(response).await
    }

    /// List a customer's card payment methods.
    pub async fn list_payment_methods(
        &self,
        customer_id: &str,
    ) -> Result<Vec<PaymentMethod>, StripeError> {
        let response = self
            .get("/payment_methods")
            .query(&[("customer", customer_id), ("type", "card"), ("limit", "10")])
            .send()
            .await?;

        let list: StripeList<PaymentMethod> = Self::handle_response(response).await?;
        Ok(list.data)
    }

    /// Give the customer a default payment method if it has none.
    async fn ensure_default_payment_method(&self, customer_id: &str) -> Result<(), StripeError> {
        let customer = self.get_customer(customer_id).await?;
        if customer.default_payment_method().is_some() {
            return Ok(());
        }

        let methods = self.list_payment_methods(customer_id).await?;
        match methods.first() {
            Some(method) => {
                tracing::info!(
                    customer_id = %customer_id,
                    payment_method = %method.id,
                    "Selecting default payment method for invoices"
                );
                self.set_default_payment_method(customer_id, &method.id).await
            }
            None => {
                tracing::warn!(customer_id = %customer_id, "Customer has no payment method on file");
                Ok(())
            }
        }
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, StripeError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let error_body: Result<StripeErrorResponse, _> = response.json().await;

        match error_body {
            Ok(stripe_error) => Err(StripeError::Api {
                error_type: stripe_error.error.error_type,
                message: stripe_error.error.message,
                code: stripe_error.error.code,
            }),
            Err(_) => Err(StripeError::Api {
                error_type: "unknown".to_string(),
                message: format!("HTTP {status}"),
                code: None,
            }),
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn list_subscriptions(
        &self,
        customer_id: &str,
    ) -> Result<Vec<StripeSubscription>, StripeError> {
        let response = self
            .get("/subscriptions")
            .query(&[("customer", customer_id), ("status", "all"), ("limit", "10")])
            .send()
            .await?;

        let list: StripeList<StripeSubscription> = Self::handle_response(response).await?;
        Ok(list.data)
    }

    async fn get_price(&self, price_id: &str) -> Result<Price, StripeError> {
        let response = self.get(&format!("/prices/{price_id}")).send().await?;
        Self::handle_response(response).await
    }

    async fn create_and_pay_invoice(
        &self,
        request: &InvoiceRequest,
    ) -> Result<Invoice, StripeError> {
        self.ensure_default_payment_method(&request.customer_id)
            .await?;

        let workspace_id = request.workspace_id.to_string();
        let credits = request.credits.to_string();

        let item_params = [
            ("customer", request.customer_id.clone()),
            ("quantity", credits.clone()),
            ("unit_amount", request.unit_amount.to_string()),
            ("currency", request.currency.clone()),
            ("description", request.description.clone()),
            ("metadata[workspace_id]", workspace_id.clone()),
        ];
        let response = self
            .post("/invoiceitems", Some(&format!("{}-item", request.idempotency_key)))
            .form(&item_params)
            .send()
            .await?;
        let _: serde_json::Value = Self::handle_response(response).await?;

        let invoice_params = [
            ("customer", request.customer_id.clone()),
            ("collection_method", "charge_automatically".to_string()),
            ("auto_advance", "false".to_string()),
            ("pending_invoice_items_behavior", "include".to_string()),
            ("description", request.description.clone()),
            ("metadata[workspace_id]", workspace_id),
            ("metadata[credits]", credits),
        ];
        let response = self
            .post("/invoices", Some(&format!("{}-invoice", request.idempotency_key)))
            .form(&invoice_params)
            .send()
            .await?;
        let draft: Invoice = Self::handle_response(response).await?;

        let response = self
            .post(
                &format!("/invoices/{}/finalize", draft.id),
                Some(&format!("{}-finalize", request.idempotency_key)),
            )
            .send()
            .await?;
        let _: Invoice = Self::handle_response(response).await?;

        let response = self
            .post(
                &format!("/invoices/{}/pay", draft.id),
                Some(&format!("{}-pay", request.idempotency_key)),
            )
            .send()
            .await?;
        let paid: Invoice = Self::handle_response(response).await?;

        tracing::info!(
            customer_id = %request.customer_id,
            invoice_id = %paid.id,
            credits = request.credits,
            amount_paid = paid.amount_paid,
            "Smart recharge invoice paid"
        );

        Ok(paid)
    }

    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> Result<(), StripeError> {
        let response = self
            .post(&format!("/customers/{customer_id}"), None)
            .form(&[("invoice_settings[default_payment_method]", payment_method_id)])
            .send()
            .await?;
        let _: Customer = Self::handle_response(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use credit_ledger_core::WorkspaceId;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::stripe::types::smart_recharge_description;

    fn client(server: &MockServer) -> StripeClient {
        StripeClient::new("sk_test_123", Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.uri())
    }

    fn recharge_request() -> InvoiceRequest {
        InvoiceRequest {
            workspace_id: WorkspaceId::generate(),
            customer_id: "cus_1".into(),
            credits: 200,
            unit_amount: 1,
            currency: "usd".into(),
            description: smart_recharge_description(200),
            idempotency_key: "recharge-01HZ".into(),
        }
    }

    #[tokio::test]
    async fn get_price_parses_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prices/price_pro"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "price_pro",
                "unit_amount": 2000,
                "currency": "usd",
                "recurring": {"interval": "month", "interval_count": 1}
            })))
            .mount(&server)
            .await;

        let price = client(&server).get_price("price_pro").await.unwrap();
        assert_eq!(price.unit_amount, Some(2000));
        assert_eq!(price.recurring.unwrap().interval, "month");
    }

    #[tokio::test]
    async fn api_errors_are_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prices/price_missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"type": "invalid_request_error", "message": "No such price", "code": "resource_missing"}
            })))
            .mount(&server)
            .await;

        let err = client(&server).get_price("price_missing").await.unwrap_err();
        match err {
            StripeError::Api { error_type, code, .. } => {
                assert_eq!(error_type, "invalid_request_error");
                assert_eq!(code.as_deref(), Some("resource_missing"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn list_subscriptions_queries_by_customer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subscriptions"))
            .and(query_param("customer", "cus_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "data": [{"id": "sub_1", "customer": "cus_1", "status": "active"}],
                "has_more": false
            })))
            .mount(&server)
            .await;

        let subs = client(&server).list_subscriptions("cus_1").await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].status, "active");
    }

    #[tokio::test]
    async fn invoice_flow_sends_idempotency_keys_and_selects_payment_method() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/customers/cus_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cus_1",
                "invoice_settings": {"default_payment_method": null}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/payment_methods"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "pm_card"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/customers/cus_1"))
            .and(body_string_contains("pm_card"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "cus_1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/invoiceitems"))
            .and(header("Idempotency-Key", "recharge-01HZ-item"))
            .and(body_string_contains("quantity=200"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "ii_1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/invoices"))
            .and(header("Idempotency-Key", "recharge-01HZ-invoice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "in_1", "status": "draft"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/invoices/in_1/finalize"))
            .and(header("Idempotency-Key", "recharge-01HZ-finalize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "in_1", "status": "open"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/invoices/in_1/pay"))
            .and(header("Idempotency-Key", "recharge-01HZ-pay"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "in_1",
                "status": "paid",
                "amount_paid": 200
            })))
            .expect(1)
            .mount(&server)
            .await;

        let invoice = client(&server)
            .create_and_pay_invoice(&recharge_request())
            .await
            .unwrap();

        assert_eq!(invoice.id, "in_1");
        assert_eq!(invoice.status.as_deref(), Some("paid"));
        assert_eq!(invoice.amount_paid, 200);
    }

    #[tokio::test]
    async fn failed_payment_propagates() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/customers/cus_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cus_1",
                "invoice_settings": {"default_payment_method": "pm_card"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/invoiceitems"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "ii_1"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/invoices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "in_2"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/invoices/in_2/finalize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "in_2"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/invoices/in_2/pay"))
            .respond_with(ResponseTemplate::new(402).set_body_json(json!({
                "error": {"type": "card_error", "message": "Your card was declined.", "code": "card_declined"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .create_and_pay_invoice(&recharge_request())
            .await
            .unwrap_err();
        assert!(matches!(err, StripeError::Api { ref error_type, .. } if error_type == "card_error"));

        let ledger_err: LedgerError = err.into();
        assert!(matches!(ledger_err, LedgerError::ExternalService { ref service, .. } if service == "stripe"));
    }
}
