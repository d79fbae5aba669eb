// src/handlers/availability.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    common::error::ApiError,
    config::AppState,
    middleware::{
        i18n::Locale,
        rbac::{CapRdvOperate, RequireCapability},
        tenancy::TenantContext,
    },
    models::scheduling::{AvailabilityResponse, AvailableDatesResponse, PlanningResponse},
    services::availability_service::{DisplayMode, SlotQuery},
};

#[derive(Debug, Deserialize, IntoParams)]
pub struct DisponibilitesQuery {
    /// Data local do centro (AAAA-MM-DD)
    pub date: NaiveDate,
    #[param(example = "CTP")]
    pub type_controle: String,
    #[param(example = "VP")]
    pub type_vehicule: Option<String>,
    pub type_carburant: Option<String>,
    /// `any` (padrão) ou `controleur`
    #[serde(default)]
    #[param(value_type = Option<String>, example = "any")]
    pub mode: DisplayMode,
}

// GET /api/centres/{id}/disponibilites
#[utoipa::path(
    get,
    path = "/api/centres/{id}/disponibilites",
    tag = "Disponibilités",
    params(
        ("id" = Uuid, Path, description = "ID do centro"),
        DisponibilitesQuery,
        ("x-tenant-id" = Uuid, Header, description = "ID da rede")
    ),
    responses(
        (status = 200, description = "Créneaux do dia", body = AvailabilityResponse),
        (status = 404, description = "Centro não encontrado")
    )
)]
pub async fn get_disponibilites(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    Path(centre_id): Path<Uuid>,
    Query(params): Query<DisponibilitesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let query = SlotQuery {
        centre_id,
        date: params.date,
        service_type: params.type_controle,
        vehicle_type: params.type_vehicule,
        fuel_type: params.type_carburant,
    };

    let response = app_state
        .availability_service
        .slots(tenant.0, &query, params.mode, app_state.clock.now())
        .await
        .map_err(|app_err| app_err.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::OK, Json(response)))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct DatesQuery {
    #[param(example = "CTP")]
    pub type_controle: String,
    pub type_vehicule: Option<String>,
    pub date_debut: Option<NaiveDate>,
    pub date_fin: Option<NaiveDate>,
}

// GET /api/centres/{id}/dates-disponibles
#[utoipa::path(
    get,
    path = "/api/centres/{id}/dates-disponibles",
    tag = "Disponibilités",
    params(
        ("id" = Uuid, Path, description = "ID do centro"),
        DatesQuery,
        ("x-tenant-id" = Uuid, Header, description = "ID da rede")
    ),
    responses(
        (status = 200, description = "Datas com ao menos um horário livre", body = AvailableDatesResponse),
        (status = 400, description = "Intervalo inválido")
    )
)]
pub async fn get_dates_disponibles(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    Path(centre_id): Path<Uuid>,
    Query(params): Query<DatesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let response = app_state
        .availability_service
        .available_dates(
            tenant.0,
            centre_id,
            &params.type_controle,
            params.type_vehicule.as_deref(),
            params.date_debut,
            params.date_fin,
            app_state.clock.now(),
        )
        .await
        .map_err(|app_err| app_err.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::OK, Json(response)))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct PlanningQuery {
    pub date: NaiveDate,
    #[param(example = "CTP")]
    pub type_controle: String,
    pub type_vehicule: Option<String>,
}

// GET /api/centres/{id}/planning
#[utoipa::path(
    get,
    path = "/api/centres/{id}/planning",
    tag = "Disponibilités",
    params(
        ("id" = Uuid, Path, description = "ID do centro"),
        PlanningQuery,
        ("x-tenant-id" = Uuid, Header, description = "ID da rede")
    ),
    responses(
        (status = 200, description = "Grade por controlador", body = PlanningResponse),
        (status = 403, description = "Sem a capacidade rdv:operate")
    ),
    security(("api_jwt" = []))
)]
pub async fn get_planning(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    _guard: RequireCapability<CapRdvOperate>,
    Path(centre_id): Path<Uuid>,
    Query(params): Query<PlanningQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let query = SlotQuery {
        centre_id,
        date: params.date,
        service_type: params.type_controle,
        vehicle_type: params.type_vehicule,
        fuel_type: None,
    };

    let response = app_state
        .availability_service
        .planning(tenant.0, &query, app_state.clock.now())
        .await
        .map_err(|app_err| app_err.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::OK, Json(response)))
}
