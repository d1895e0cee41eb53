use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use inflow_core::Currency;
use inflow_payments::{
    GatewayError, IntentRequest, IntentStatus, LinkRequest, PaymentGateway, PaymentIntent,
    PaymentLink,
};

const DEFAULT_API_BASE: &str = "https://api.stripe.com/v1";

#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub api_base: String,
}

impl StripeConfig {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Reads `STRIPE_SECRET_KEY`; `None` when unset.
    pub fn from_env() -> Option<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY").ok()?;
        let api_base = std::env::var("STRIPE_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.into());
        Some(Self {
            secret_key,
            api_base,
        })
    }
}

impl core::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct StripeGateway {
    config: StripeConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct StripeIntent {
    id: String,
    status: IntentStatus,
    amount: i64,
    currency: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    next_action: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StripeLink {
    id: String,
    url: String,
}

impl StripeIntent {
    fn into_intent(self) -> Result<PaymentIntent, GatewayError> {
        let currency: Currency = self
            .currency
            .parse()
            .map_err(|e: inflow_core::DomainError| GatewayError::InvalidResponse(e.to_string()))?;
        Ok(PaymentIntent {
            id: self.id,
            status: self.status,
            amount: self.amount,
            currency,
            client_secret: self.client_secret,
            next_action: self.next_action.filter(|v| !v.is_null()),
        })
    }
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<T, GatewayError> {
        let response = self
            .client
            .post(format!("{}{path}", self.config.api_base))
            .basic_auth(&self.config.secret_key, Some(""))
            .form(params)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        decode(response).await
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let response = self
            .client
            .get(format!("{}{path}", self.config.api_base))
            .basic_auth(&self.config.secret_key, Some(""))
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        decode(response).await
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, GatewayError> {
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::UnknownIntent(body));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(%status, body = %body, "stripe rejected the request");
        return Err(if status.is_server_error() {
            GatewayError::Transport(format!("{status}: {body}"))
        } else {
            GatewayError::Rejected(body)
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}

fn metadata_params<'a>(
    metadata: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> impl Iterator<Item = (String, String)> {
    metadata
        .into_iter()
        .map(|(k, v)| (format!("metadata[{k}]"), v.clone()))
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(amount = request.amount, currency = %request.currency))]
    async fn create_payment_intent(&self, request: IntentRequest) -> Result<PaymentIntent, GatewayError> {
        let mut params = vec![
            ("amount".to_string(), request.amount.to_string()),
            ("currency".to_string(), request.currency.code().to_ascii_lowercase()),
            ("customer".to_string(), request.customer_ref.clone()),
        ];
        if let Some(method) = &request.payment_method_id {
            params.push(("payment_method".to_string(), method.clone()));
        }
        params.extend(metadata_params(&request.metadata));

        let intent: StripeIntent = self.post_form("/payment_intents", &params).await?;
        info!(intent_id = %intent.id, status = intent.status.as_str(), "payment intent created");
        intent.into_intent()
    }

    #[instrument(skip(self))]
    async fn confirm_payment_intent(
        &self,
        intent_id: &str,
        return_url: &str,
    ) -> Result<PaymentIntent, GatewayError> {
        let params = vec![("return_url".to_string(), return_url.to_string())];
        let intent: StripeIntent = self
            .post_form(&format!("/payment_intents/{intent_id}/confirm"), &params)
            .await?;
        info!(intent_id = %intent.id, status = intent.status.as_str(), "payment intent confirmed");
        intent.into_intent()
    }

    #[instrument(skip(self))]
    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        let intent: StripeIntent = self.get(&format!("/payment_intents/{intent_id}")).await?;
        intent.into_intent()
    }

    #[instrument(skip(self, request), fields(lines = request.line_items.len()))]
    async fn create_payment_link(&self, request: LinkRequest) -> Result<PaymentLink, GatewayError> {
        let currency = request.currency.code().to_ascii_lowercase();
        let mut params = Vec::new();
        for (i, line) in request.line_items.iter().enumerate() {
            params.push((format!("line_items[{i}][price_data][currency]"), currency.clone()));
            params.push((format!("line_items[{i}][price_data][unit_amount]"), line.amount.to_string()));
            params.push((
                format!("line_items[{i}][price_data][product_data][name]"),
                line.name.clone(),
            ));
            params.push((format!("line_items[{i}][quantity]"), line.quantity.to_string()));
        }
        params.push(("after_completion[type]".to_string(), "redirect".to_string()));
        params.push(("after_completion[redirect][url]".to_string(), request.redirect_url.clone()));
        params.extend(metadata_params(&request.metadata));

        let link: StripeLink = self.post_form("/payment_links", &params).await?;
        info!(link_id = %link.id, "payment link created");
        Ok(PaymentLink {
            id: link.id,
            url: link.url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_intents_map_to_domain_intents() {
        let raw: StripeIntent = serde_json::from_value(serde_json::json!({
            "id": "pi_1",
            "status": "requires_action",
            "amount": 1250,
            "currency": "usd",
            "client_secret": "pi_1_secret",
            "next_action": {"type": "redirect_to_url"}
        }))
        .unwrap();
        let intent = raw.into_intent().unwrap();
        assert_eq!(intent.currency, Currency::Usd);
        assert_eq!(intent.status, IntentStatus::RequiresAction);
        assert!(intent.next_action.is_some());
    }

    #[test]
    fn unsupported_currencies_are_invalid_responses() {
        let raw: StripeIntent = serde_json::from_value(serde_json::json!({
            "id": "pi_2", "status": "succeeded", "amount": 1, "currency": "eur"
        }))
        .unwrap();
        assert!(matches!(raw.into_intent(), Err(GatewayError::InvalidResponse(_))));
    }
}
