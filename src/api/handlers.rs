use axum::{
    body::Body,
    extract::{MatchedPath, Path, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::api::requests::{is_plausible_email, PaymentConfirmedRequest};
use crate::api::responses::{
    ApiResponse, ConfirmationResponse, CustomerOrdersResponse, ErrorResponse, OrderResponse,
    ValidationErrorDetail,
};
use crate::error::AppError;
use crate::observability::{get_metrics, AggregatedHealth, LatencyTimer};

use super::routes::AppState;

type ErrorReply = (StatusCode, Json<ApiResponse<()>>);

/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<AggregatedHealth>> {
    Json(ApiResponse::success(state.health_checker.check_all().await))
}

/// Readiness check endpoint.
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    if state.health_checker.is_ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Liveness check endpoint.
pub async fn liveness_check(State(state): State<AppState>) -> StatusCode {
    if state.health_checker.is_alive() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus scrape endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ============================================================================
// Webhook Handlers
// ============================================================================

/// Payment provider's "payment confirmed" webhook.
pub async fn payment_confirmed(
    State(state): State<AppState>,
    Json(request): Json<PaymentConfirmedRequest>,
) -> Result<Json<ApiResponse<ConfirmationResponse>>, ErrorReply> {
    if let Err(errors) = request.validate() {
        let details: Vec<ValidationErrorDetail> = errors
            .iter()
            .map(|e| ValidationErrorDetail {
                field: e.field.clone(),
                message: e.message.clone(),
            })
            .collect();

        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::error(
                ErrorResponse::new("VALIDATION_ERROR", "Request validation failed").with_details(details),
            )),
        ));
    }

    match state.checkout.confirm_payment(request.into_command()).await {
        Ok(confirmation) => Ok(Json(ApiResponse::success(ConfirmationResponse::from(confirmation)))),
        Err(e) => Err(payment_error_reply(&e)),
    }
}

// ============================================================================
// Customer Handlers
// ============================================================================

/// A customer's orders, newest first.
pub async fn customer_orders(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<ApiResponse<CustomerOrdersResponse>>, ErrorReply> {
    if !is_plausible_email(&email) {
        return Err(error_reply(&AppError::Validation("email must be a valid email address".to_string())));
    }

    let result = state
        .checkout
        .orders_for_customer(&email)
        .await
        .map_err(|e| error_reply(&e))?;

    Ok(Json(ApiResponse::success(CustomerOrdersResponse {
        orders: result.data.into_iter().map(OrderResponse::from).collect(),
        cached: result.cached,
    })))
}

/// Maps an error to a status and envelope. Internal details stay in the log.
pub fn error_reply(error: &AppError) -> ErrorReply {
    let status = error.status_code();
    let message = if status.is_server_error() {
        tracing::error!(error = %error, "Request failed");
        match status {
            StatusCode::SERVICE_UNAVAILABLE => "A dependency is temporarily unavailable, retry shortly".to_string(),
            _ => "An internal error occurred".to_string(),
        }
    } else {
        error.to_string()
    };

    (status, Json(ApiResponse::<()>::error(ErrorResponse::new(error.error_code(), message))))
}

/// Payment-path mapping: a timeout or exhausted retry means the outcome is
/// unknown, so the caller is told to retry rather than that it failed.
pub fn payment_error_reply(error: &AppError) -> ErrorReply {
    if error.is_timeout() || matches!(error, AppError::RetryExhausted { .. }) {
        tracing::warn!(error = %error, "Payment verification pending");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::<()>::error(ErrorResponse::new(
                "PAYMENT_VERIFICATION_PENDING",
                "Payment verification is taking longer than expected. Retry in a few seconds; \
                 the payment will not be applied twice.",
            ))),
        );
    }
    error_reply(error)
}

/// Records request count and latency per matched route.
pub async fn track_metrics(request: Request<Body>, next: Next) -> Response {
    let timer = LatencyTimer::new();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    get_metrics().record_http_request(&method, &path, response.status().as_u16(), timer.elapsed_ms());
    response
}
