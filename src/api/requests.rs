use serde::{Deserialize, Serialize};

use crate::orders::ConfirmPayment;

/// Payment-confirmed webhook body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmedRequest {
    pub quote_id: String,
    pub payment_intent_id: String,
    pub customer_email: String,
}

impl PaymentConfirmedRequest {
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.quote_id.trim().is_empty() {
            errors.push(ValidationError { field: "quoteId".to_string(), message: "quoteId cannot be empty".to_string() });
        }
        if self.payment_intent_id.trim().is_empty() {
            errors.push(ValidationError { field: "paymentIntentId".to_string(), message: "paymentIntentId cannot be empty".to_string() });
        }
        if !is_plausible_email(&self.customer_email) {
            errors.push(ValidationError { field: "customerEmail".to_string(), message: "customerEmail must be a valid email address".to_string() });
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    pub fn into_command(self) -> ConfirmPayment {
        ConfirmPayment {
            quote_id: self.quote_id.trim().to_string(),
            payment_intent_id: self.payment_intent_id.trim().to_string(),
            customer_email: self.customer_email.trim().to_lowercase(),
        }
    }
}

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

pub(crate) fn is_plausible_email(value: &str) -> bool {
    let value = value.trim();
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.') && value.len() <= 320
        }
        None => false,
    }
}
