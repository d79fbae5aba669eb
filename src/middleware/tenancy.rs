// src/middleware/tenancy.rs

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use uuid::Uuid;

use crate::{
    common::error::{ApiError, AppError},
    config::AppState,
    middleware::{auth::AuthenticatedUser, i18n::Locale},
};

// O nome do nosso cabeçalho HTTP customizado
const TENANT_ID_HEADER: &str = "x-tenant-id";

/// Tenant da requisição (cabeçalho X-Tenant-ID). Em rotas autenticadas
/// precisa coincidir com o tenant do token.
#[derive(Debug, Clone, Copy)]
pub struct TenantContext(pub Uuid);

fn tenant_from(parts: &Parts) -> Result<Uuid, AppError> {
    let raw = parts
        .headers
        .get(TENANT_ID_HEADER)
        .ok_or(AppError::MissingTenant)?
        .to_str()
        .map_err(|_| AppError::InvalidTenant)?;

    let tenant_id = Uuid::parse_str(raw.trim()).map_err(|_| AppError::InvalidTenant)?;

    if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
        if user.0.tenant_id != tenant_id {
            return Err(AppError::TenantMismatch);
        }
    }
    Ok(tenant_id)
}

impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        tenant_from(parts).map(TenantContext).map_err(|e| {
            let app_state = AppState::from_ref(state);
            e.to_api_error(&Locale::from_headers(&parts.headers), &app_state.i18n_store)
        })
    }
}
