// src/handlers/payments.rs

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::error::{ApiError, AppError},
    config::AppState,
    middleware::{i18n::Locale, tenancy::TenantContext},
    models::{
        payment::{SettlementOutcome, WebhookAck},
        pricing::PromoCheckResponse,
    },
    services::payment_service::{map_provider_status, Settlement},
};

const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

type HmacSha256 = Hmac<Sha256>;

/// Compara os segredos em tempo constante: os dois viram MACs de tamanho fixo
/// e `verify_slice` não curto-circuita no primeiro byte diferente.
fn secret_matches(provided: &str, expected: &str) -> bool {
    let (Ok(mut reference), Ok(mut candidate)) = (
        HmacSha256::new_from_slice(expected.as_bytes()),
        HmacSha256::new_from_slice(provided.as_bytes()),
    ) else {
        return false;
    };
    reference.update(WEBHOOK_SECRET_HEADER.as_bytes());
    candidate.update(WEBHOOK_SECRET_HEADER.as_bytes());
    candidate.verify_slice(&reference.finalize().into_bytes()).is_ok()
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CheckPromoPayload {
    pub centre_id: Uuid,
    #[validate(length(min = 1, message = "required"))]
    #[schema(example = "CTP")]
    pub type_controle: String,
    #[validate(length(min = 1, message = "required"))]
    #[schema(example = "VP")]
    pub type_vehicule: String,
    #[validate(length(min = 1, message = "required"))]
    #[schema(example = "SUMMER10")]
    pub code: String,
}

// POST /api/paiements/check-promo
#[utoipa::path(
    post,
    path = "/api/paiements/check-promo",
    tag = "Paiements",
    request_body = CheckPromoPayload,
    params(
        ("x-tenant-id" = Uuid, Header, description = "ID da rede")
    ),
    responses(
        (status = 200, description = "Resultado da validação (válido ou com o motivo da recusa)", body = PromoCheckResponse),
        (status = 404, description = "Sem tarifa para a prestação")
    )
)]
pub async fn check_promo(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    Json(payload): Json<CheckPromoPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::from(e).to_api_error(&locale, &app_state.i18n_store))?;

    let response = app_state
        .pricing_service
        .check_promo(
            tenant.0,
            payload.centre_id,
            &payload.type_controle,
            &payload.type_vehicule,
            &payload.code,
            app_state.clock.now(),
        )
        .await
        .map_err(|app_err| app_err.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::OK, Json(response)))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct WebhookPayload {
    pub rdv_id: Uuid,
    #[schema(example = "pi_3Nf2...")]
    pub transaction_id: String,
    /// Status bruto do provedor (`succeeded`, `failed`, `refunded`...)
    #[schema(example = "succeeded")]
    pub statut: String,
    #[schema(value_type = Option<f64>, example = 70.2)]
    pub montant: Option<Decimal>,
}

// POST /api/paiements/webhook
#[utoipa::path(
    post,
    path = "/api/paiements/webhook",
    tag = "Paiements",
    request_body = WebhookPayload,
    params(
        ("x-webhook-secret" = String, Header, description = "Segredo compartilhado com o provedor")
    ),
    responses(
        (status = 200, description = "Callback processado (inclusive duplicado ou ignorado)", body = WebhookAck),
        (status = 401, description = "Segredo inválido")
    )
)]
pub async fn webhook(
    State(app_state): State<AppState>,
    locale: Locale,
    headers: HeaderMap,
    Json(payload): Json<WebhookPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let authorized = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|secret| secret_matches(secret, &app_state.webhook_secret));
    if !authorized {
        tracing::warn!(rdv_id = %payload.rdv_id, "Callback de pagamento com segredo inválido");
        return Err(AppError::InvalidWebhookSecret.to_api_error(&locale, &app_state.i18n_store));
    }

    let Some(status) = map_provider_status(&payload.statut) else {
        tracing::info!(rdv_id = %payload.rdv_id, statut = %payload.statut, "Status de provedor ignorado");
        return Ok((
            StatusCode::OK,
            Json(WebhookAck {
                received: true,
                outcome: SettlementOutcome::Ignored,
            }),
        ));
    };

    let settlement = Settlement {
        appointment_id: payload.rdv_id,
        transaction_id: payload.transaction_id,
        status,
        amount: payload.montant,
    };
    let outcome = app_state
        .payment_service
        .settle(&settlement, app_state.clock.now())
        .await
        .map_err(|app_err| app_err.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((
        StatusCode::OK,
        Json(WebhookAck {
            received: true,
            outcome,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_secret_must_match_exactly() {
        let expected = "whsec_9f2c1a";
        assert!(secret_matches("whsec_9f2c1a", expected));
        assert!(!secret_matches("whsec_9f2c1b", expected));
        assert!(!secret_matches("whsec_9f2c", expected));
        assert!(!secret_matches("whsec_9f2c1a ", expected));
        assert!(!secret_matches("", expected));
    }
}
