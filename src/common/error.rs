// src/common/error.rs

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use thiserror::Error;
use validator::ValidationErrorsKind;

use crate::{
    common::i18n::I18nStore,
    middleware::i18n::Locale,
    models::pricing::PromoRejection,
    services::lifecycle::DenyReason,
};

// Erro de domínio. Os serviços só conhecem este tipo; a tradução para HTTP
// acontece em `to_api_error`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Erro de validação")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Horário indisponível")]
    SlotUnavailable,

    #[error("Código promocional inválido: {0}")]
    PromoInvalid(PromoRejection),

    #[error("Transição não permitida: {0}")]
    TransitionNotAllowed(DenyReason),

    #[error("Pagamento recusado: {0}")]
    PaymentFailed(String),

    #[error("Preço alterado: esperado {expected}, atual {actual}")]
    PriceChanged { expected: Decimal, actual: Decimal },

    // Nunca deveria acontecer se os invariantes valem. Vai para o log de alerta.
    #[error("Violação de consistência: {0}")]
    ConsistencyViolation(String),

    #[error("Centro não encontrado")]
    CentreNotFound,

    #[error("Agendamento não encontrado")]
    AppointmentNotFound,

    #[error("Tarifa não encontrada para {service_type}/{vehicle_type}")]
    TariffNotFound {
        service_type: String,
        vehicle_type: String,
    },

    #[error("Requisição inválida: {0}")]
    BadRequest(String),

    #[error("Token inválido")]
    InvalidToken,

    #[error("Permissão ausente: {0}")]
    MissingCapability(&'static str),

    #[error("O tenant do token não corresponde ao X-Tenant-ID")]
    TenantMismatch,

    #[error("Cabeçalho X-Tenant-ID ausente")]
    MissingTenant,

    #[error("Cabeçalho X-Tenant-ID inválido")]
    InvalidTenant,

    #[error("Segredo do webhook inválido")]
    InvalidWebhookSecret,

    #[error("Erro de banco de dados")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Erro de JWT: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    #[error("Erro interno do servidor")]
    InternalServerError(#[from] anyhow::Error),
}

// Resposta de erro enviada ao cliente.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub details: Option<Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.details {
            Some(details) => json!({ "error": self.error, "details": details }),
            None => json!({ "error": self.error }),
        };
        (self.status, Json(body)).into_response()
    }
}

// { campo: [mensagens] }, com objetos aninhados para `#[validate(nested)]`.
fn validation_details(errors: &validator::ValidationErrors) -> Value {
    let mut details = serde_json::Map::new();
    for (field, kind) in errors.errors() {
        let value = match kind {
            ValidationErrorsKind::Field(field_errors) => json!(field_errors
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect::<Vec<String>>()),
            ValidationErrorsKind::Struct(inner) => validation_details(inner),
            ValidationErrorsKind::List(items) => Value::Object(
                items
                    .iter()
                    .map(|(index, inner)| (index.to_string(), validation_details(inner)))
                    .collect(),
            ),
        };
        details.insert(field.to_string(), value);
    }
    Value::Object(details)
}

impl AppError {
    /// Converte o erro de domínio na resposta HTTP, com a mensagem no idioma do cliente.
    pub fn to_api_error(&self, locale: &Locale, i18n: &I18nStore) -> ApiError {
        let lang = locale.0.as_str();
        let simple = |status: StatusCode, key: &str| ApiError {
            status,
            error: i18n.translate(lang, key, &[]),
            details: None,
        };

        match self {
            AppError::ValidationError(errors) => ApiError {
                status: StatusCode::BAD_REQUEST,
                error: i18n.translate(lang, "validation_failed", &[]),
                details: Some(validation_details(errors)),
            },
            AppError::SlotUnavailable => simple(StatusCode::CONFLICT, "slot_unavailable"),
            AppError::PromoInvalid(reason) => ApiError {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                error: i18n.translate(lang, &format!("promo.{}", reason.code()), &[]),
                details: Some(json!({ "reason": reason.code() })),
            },
            AppError::TransitionNotAllowed(reason) => {
                let params = reason.params();
                let params: Vec<(&str, &str)> =
                    params.iter().map(|(k, v)| (*k, v.as_str())).collect();
                ApiError {
                    status: StatusCode::CONFLICT,
                    error: i18n.translate(lang, &format!("transition.{}", reason.code()), &params),
                    details: Some(json!({ "reason": reason.code() })),
                }
            }
            AppError::PaymentFailed(_) => simple(StatusCode::PAYMENT_REQUIRED, "payment_failed"),
            AppError::PriceChanged { expected, actual } => ApiError {
                status: StatusCode::CONFLICT,
                error: i18n.translate(lang, "price_changed", &[]),
                details: Some(json!({ "expected": expected, "actual": actual })),
            },
            AppError::ConsistencyViolation(detail) => {
                tracing::error!(
                    target: "ctrdv::consistency",
                    alert = true,
                    "Violação de consistência exposta na API: {}",
                    detail
                );
                simple(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
            AppError::CentreNotFound => simple(StatusCode::NOT_FOUND, "centre_not_found"),
            AppError::AppointmentNotFound => simple(StatusCode::NOT_FOUND, "appointment_not_found"),
            AppError::TariffNotFound { .. } => simple(StatusCode::NOT_FOUND, "tariff_not_found"),
            AppError::BadRequest(message) => ApiError {
                status: StatusCode::BAD_REQUEST,
                error: i18n.translate(lang, "bad_request", &[]),
                details: Some(json!({ "message": message })),
            },
            AppError::InvalidToken | AppError::JwtError(_) => {
                simple(StatusCode::UNAUTHORIZED, "invalid_token")
            }
            AppError::MissingCapability(capability) => ApiError {
                status: StatusCode::FORBIDDEN,
                error: i18n.translate(lang, "missing_capability", &[("capability", *capability)]),
                details: None,
            },
            AppError::TenantMismatch => simple(StatusCode::FORBIDDEN, "tenant_mismatch"),
            AppError::MissingTenant => simple(StatusCode::BAD_REQUEST, "missing_tenant"),
            AppError::InvalidTenant => simple(StatusCode::BAD_REQUEST, "invalid_tenant"),
            AppError::InvalidWebhookSecret => simple(StatusCode::UNAUTHORIZED, "invalid_webhook_secret"),

            // Banco, anyhow etc. viram 500; o detalhe fica só no log.
            e => {
                tracing::error!("Erro Interno do Servidor: {:?}", e);
                simple(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn fr() -> Locale {
        Locale("fr".to_string())
    }

    #[test]
    fn slot_race_is_a_conflict() {
        let i18n = I18nStore::load().unwrap();
        let api = AppError::SlotUnavailable.to_api_error(&fr(), &i18n);
        assert_eq!(api.status, StatusCode::CONFLICT);
        assert!(!api.error.is_empty());
    }

    #[test]
    fn promo_rejection_carries_reason_code() {
        let i18n = I18nStore::load().unwrap();
        let api = AppError::PromoInvalid(PromoRejection::OutOfScope).to_api_error(&fr(), &i18n);
        assert_eq!(api.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(api.details, Some(json!({ "reason": "out_of_scope" })));
    }

    #[test]
    fn gate_message_interpolates_threshold() {
        let i18n = I18nStore::load().unwrap();
        let err = AppError::TransitionNotAllowed(DenyReason::TooLateToCancel {
            min_lead: Duration::hours(24),
        });
        let api = err.to_api_error(&Locale("en".to_string()), &i18n);
        assert_eq!(api.status, StatusCode::CONFLICT);
        assert!(api.error.contains("24"), "{}", api.error);
    }

    #[test]
    fn consistency_violation_hides_detail() {
        let i18n = I18nStore::load().unwrap();
        let api = AppError::ConsistencyViolation("overlap on ctrl:x".into()).to_api_error(&fr(), &i18n);
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!api.error.contains("ctrl:x"));
    }
}
