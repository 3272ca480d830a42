//! §7 error taxonomy as an `actix_web::ResponseError` impl. Never leaks
//! internal detail strings — full detail is logged server-side.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use gateway_payments::{DecisionError, VerificationFailure};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("authentication failed")]
    Authentication,
    #[error("payment required")]
    PaymentRequired { sub_code: &'static str },
    #[error("ambiguous payment")]
    AmbiguousPayment,
    #[error("invalid request")]
    InvalidRequest,
    #[error("rate limited")]
    RateLimited { retry_after_secs: u64 },
    #[error("global limit")]
    GlobalLimit { retry_after_secs: u64 },
    #[error("circuit open")]
    CircuitOpen,
    #[error("provider unavailable")]
    ProviderUnavailable,
    #[error("binding invalid")]
    BindingInvalid,
    #[error("nonce replayed")]
    NonceReplayed,
    #[error("internal error")]
    Internal,
}

impl From<DecisionError> for GatewayError {
    fn from(e: DecisionError) -> Self {
        match e {
            DecisionError::AmbiguousPayment => GatewayError::AmbiguousPayment,
            DecisionError::AuthenticationFailed => GatewayError::Authentication,
            DecisionError::InsufficientBalance => GatewayError::PaymentRequired { sub_code: "INSUFFICIENT_BALANCE" },
            DecisionError::DebitRaceLost => GatewayError::PaymentRequired { sub_code: "DEBIT_RACE_LOST" },
            DecisionError::RateLimited { retry_after_secs } => GatewayError::RateLimited { retry_after_secs },
            DecisionError::ServiceUnavailable { retry_after_secs } => GatewayError::GlobalLimit { retry_after_secs },
            DecisionError::ReceiptInvalid(failure) => GatewayError::from(failure),
        }
    }
}

impl From<VerificationFailure> for GatewayError {
    fn from(failure: VerificationFailure) -> Self {
        match failure {
            VerificationFailure::BindingInvalid => GatewayError::BindingInvalid,
            VerificationFailure::NonceReplayed => GatewayError::NonceReplayed,
            other => GatewayError::PaymentRequired { sub_code: failure_sub_code(&other) },
        }
    }
}

fn failure_sub_code(failure: &VerificationFailure) -> &'static str {
    match failure {
        VerificationFailure::ChallengeUnknown => "CHALLENGE_UNKNOWN",
        VerificationFailure::ChallengeTampered => "CHALLENGE_TAMPERED",
        VerificationFailure::ChallengeExpired => "CHALLENGE_EXPIRED",
        VerificationFailure::SettlementInsufficient => "SETTLEMENT_INSUFFICIENT",
        VerificationFailure::BindingInvalid | VerificationFailure::NonceReplayed => unreachable!("handled by dedicated variants"),
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Authentication => StatusCode::UNAUTHORIZED,
            GatewayError::PaymentRequired { .. } => StatusCode::PAYMENT_REQUIRED,
            GatewayError::AmbiguousPayment | GatewayError::InvalidRequest => StatusCode::BAD_REQUEST,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::GlobalLimit { .. } | GatewayError::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::ProviderUnavailable => StatusCode::BAD_GATEWAY,
            GatewayError::BindingInvalid => StatusCode::BAD_REQUEST,
            GatewayError::NonceReplayed => StatusCode::CONFLICT,
            GatewayError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        tracing::error!(error = %self, "request rejected");
        let code = match self {
            GatewayError::Authentication => "UNAUTHORIZED",
            GatewayError::PaymentRequired { sub_code } => sub_code,
            GatewayError::AmbiguousPayment => "AMBIGUOUS_PAYMENT",
            GatewayError::InvalidRequest => "INVALID_REQUEST",
            GatewayError::RateLimited { .. } => "RATE_LIMITED",
            GatewayError::GlobalLimit { .. } => "GLOBAL_LIMIT",
            GatewayError::CircuitOpen => "BUDGET_CIRCUIT_OPEN",
            GatewayError::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            GatewayError::BindingInvalid => "BINDING_INVALID",
            GatewayError::NonceReplayed => "NONCE_REPLAYED",
            GatewayError::Internal => "INTERNAL_ERROR",
        };
        let mut builder = HttpResponse::build(self.status_code());
        match self {
            GatewayError::RateLimited { retry_after_secs } | GatewayError::GlobalLimit { retry_after_secs } => {
                builder.insert_header(("Retry-After", retry_after_secs.to_string()));
            }
            _ => {}
        }
        builder.json(serde_json::json!({ "error": "request failed", "code": code }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failure_is_never_402() {
        let err: GatewayError = DecisionError::AuthenticationFailed.into();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn insufficient_balance_is_never_401() {
        let err: GatewayError = DecisionError::InsufficientBalance.into();
        assert_eq!(err.status_code(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn binding_invalid_is_400_not_402() {
        let err: GatewayError = VerificationFailure::BindingInvalid.into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn nonce_replayed_is_409() {
        let err: GatewayError = VerificationFailure::NonceReplayed.into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }
}
