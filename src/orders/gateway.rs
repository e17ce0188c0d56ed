use crate::config::PaymentSettings;
use crate::error::{AppError, Result};
use crate::observability::{get_metrics, LatencyTimer};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Payment intent as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    /// Minor units.
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PaymentIntent {
    pub fn is_succeeded(&self) -> bool {
        self.status == "succeeded"
    }

    /// Quote the intent was created for, if the checkout recorded one.
    pub fn quote_id(&self) -> Option<&str> {
        self.metadata.get("quote_id").map(String::as_str)
    }
}

/// Read access to the payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn retrieve_payment_intent(&self, payment_intent_id: &str) -> Result<PaymentIntent>;
}

/// Payment provider over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    secret_key: String,
}

impl HttpPaymentGateway {
    pub fn new(settings: &PaymentSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("request-reliability/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            secret_key: settings.secret_key.clone(),
        })
    }

    fn intent_url(&self, payment_intent_id: &str) -> String {
        format!("{}/v1/payment_intents/{}", self.base_url, payment_intent_id)
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn retrieve_payment_intent(&self, payment_intent_id: &str) -> Result<PaymentIntent> {
        let timer = LatencyTimer::new();
        let response = self
            .client
            .get(self.intent_url(payment_intent_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(request_error)?;
        get_metrics().record_upstream_request("payments", "retrieve_intent", timer.elapsed_ms(), status.is_success());

        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes).into_owned();
            return Err(status_error(status, body));
        }

        serde_json::from_slice(&bytes).map_err(|e| AppError::Upstream {
            service: "payments".to_string(),
            status: Some(status.as_u16()),
            message: format!("Failed to parse payment intent: {}", e),
            transient: false,
        })
    }
}

fn request_error(error: reqwest::Error) -> AppError {
    // Transport failures say nothing about the request itself.
    let transient = error.is_timeout() || error.is_connect() || error.is_request() || error.is_body();
    AppError::Upstream {
        service: "payments".to_string(),
        status: error.status().map(|s| s.as_u16()),
        message: error.to_string(),
        transient,
    }
}

/// 5xx and 429 are worth retrying; any other 4xx is the caller's problem.
fn status_error(status: StatusCode, body: String) -> AppError {
    let transient = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
    AppError::Upstream {
        service: "payments".to_string(),
        status: Some(status.as_u16()),
        message: format!("status {} body {}", status, body),
        transient,
    }
}
