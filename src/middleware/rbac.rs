// src/middleware/rbac.rs

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use std::marker::PhantomData;

use crate::{
    common::error::{ApiError, AppError},
    config::AppState,
    middleware::{auth::AuthenticatedUser, i18n::Locale},
};

/// Uma capacidade exigida por rota. Só é checada aqui, na borda HTTP.
pub trait CapabilityDef: Send + Sync + 'static {
    fn slug() -> &'static str;
}

/// Guardião: rejeita a requisição se o token não trouxer a capacidade `T`.
pub struct RequireCapability<T>(pub PhantomData<T>);

impl<T, S> FromRequestParts<S> for RequireCapability<T>
where
    T: CapabilityDef,
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let locale = Locale::from_headers(&parts.headers);

        let user = parts
            .extensions
            .get::<AuthenticatedUser>()
            .ok_or_else(|| AppError::InvalidToken.to_api_error(&locale, &app_state.i18n_store))?;

        if !user.0.has_capability(T::slug()) {
            tracing::debug!(sub = %user.0.sub, capability = T::slug(), "Capacidade ausente");
            return Err(AppError::MissingCapability(T::slug()).to_api_error(&locale, &app_state.i18n_store));
        }

        Ok(RequireCapability(PhantomData))
    }
}

// ---
// DEFINIÇÃO DAS CAPACIDADES (TIPOS)
// ---

pub struct CapRdvBook;
impl CapabilityDef for CapRdvBook {
    fn slug() -> &'static str { "rdv:book" }
}

pub struct CapRdvManage;
impl CapabilityDef for CapRdvManage {
    fn slug() -> &'static str { "rdv:manage" }
}

pub struct CapRdvOperate;
impl CapabilityDef for CapRdvOperate {
    fn slug() -> &'static str { "rdv:operate" }
}
