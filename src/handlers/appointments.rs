// src/handlers/appointments.rs

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::error::{ApiError, AppError},
    config::AppState,
    middleware::{
        auth::AuthenticatedUser,
        i18n::Locale,
        rbac::{CapRdvBook, CapRdvManage, CapRdvOperate, RequireCapability},
        tenancy::TenantContext,
    },
    models::{
        appointment::{Appointment, ClientInfo, InspectionResult, SourceChannel, VehicleInfo},
        payment::BookingReceipt,
        scheduling::hhmm,
    },
    services::reservation_service::{ReservationRequest, SlotTarget},
};

// =============================================================================
//  RESERVA + PAGAMENTO
// =============================================================================

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateRdvPayload {
    pub centre_id: Uuid,
    #[schema(example = "2030-01-08")]
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "10:00")]
    pub heure_debut: NaiveTime,
    #[validate(length(min = 1, message = "required"))]
    #[schema(example = "CTP")]
    pub type_controle: String,
    #[validate(length(min = 1, message = "required"))]
    #[schema(example = "VP")]
    pub type_vehicule: String,
    pub type_carburant: Option<String>,
    /// Controlador desejado; sem ele, qualquer controlador livre.
    pub controleur_id: Option<Uuid>,
    #[validate(nested)]
    pub client: ClientInfo,
    #[validate(nested)]
    pub vehicule: VehicleInfo,
    #[serde(default)]
    pub source: SourceChannel,
    #[schema(example = "SUMMER10")]
    pub code_promo: Option<String>,
    /// Total mostrado ao cliente; se o preço mudou a reserva é recusada.
    #[schema(value_type = Option<f64>, example = 70.2)]
    pub prix_total_attendu: Option<Decimal>,
}

impl From<CreateRdvPayload> for ReservationRequest {
    fn from(p: CreateRdvPayload) -> Self {
        Self {
            centre_id: p.centre_id,
            date: p.date,
            start_time: p.heure_debut,
            service_type: p.type_controle,
            vehicle_type: p.type_vehicule,
            fuel_type: p.type_carburant,
            controller_id: p.controleur_id,
            client: p.client,
            vehicle: p.vehicule,
            source: p.source,
            promo_code: p.code_promo,
            expected_total: p.prix_total_attendu,
        }
    }
}

// POST /api/rdv/create-with-payment
#[utoipa::path(
    post,
    path = "/api/rdv/create-with-payment",
    tag = "Rendez-vous",
    request_body = CreateRdvPayload,
    responses(
        (status = 201, description = "Horário reservado, aguardando pagamento", body = BookingReceipt),
        (status = 409, description = "Horário indisponível ou preço alterado"),
        (status = 422, description = "Código promocional inválido"),
        (status = 402, description = "Provedor de pagamento recusou")
    ),
    params(
        ("x-tenant-id" = Uuid, Header, description = "ID da rede")
    ),
    security(("api_jwt" = []))
)]
pub async fn create_with_payment(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    _guard: RequireCapability<CapRdvBook>,
    Json(payload): Json<CreateRdvPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::from(e).to_api_error(&locale, &app_state.i18n_store))?;

    let request = ReservationRequest::from(payload);
    let receipt = app_state
        .booking_service
        .create_with_payment(tenant.0, &request, app_state.clock.now())
        .await
        .map_err(|app_err| app_err.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::CREATED, Json(receipt)))
}

// GET /api/rdv/{id}
#[utoipa::path(
    get,
    path = "/api/rdv/{id}",
    tag = "Rendez-vous",
    params(
        ("id" = Uuid, Path, description = "ID do agendamento"),
        ("x-tenant-id" = Uuid, Header, description = "ID da rede")
    ),
    responses(
        (status = 200, description = "Agendamento", body = Appointment),
        (status = 404, description = "Agendamento não encontrado")
    ),
    security(("api_jwt" = []))
)]
pub async fn get_rdv(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    _guard: RequireCapability<CapRdvManage>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let appointment = app_state
        .appointment_service
        .get(tenant.0, id)
        .await
        .map_err(|app_err| app_err.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::OK, Json(appointment)))
}

// =============================================================================
//  TRANSIÇÕES DO CICLO DE VIDA
// =============================================================================

// POST /api/rdv/{id}/checkin
#[utoipa::path(
    post,
    path = "/api/rdv/{id}/checkin",
    tag = "Rendez-vous",
    params(
        ("id" = Uuid, Path, description = "ID do agendamento"),
        ("x-tenant-id" = Uuid, Header, description = "ID da rede")
    ),
    responses(
        (status = 200, description = "Chegada registrada", body = Appointment),
        (status = 409, description = "Transição não permitida")
    ),
    security(("api_jwt" = []))
)]
pub async fn checkin(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    _guard: RequireCapability<CapRdvOperate>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let appointment = app_state
        .appointment_service
        .check_in(tenant.0, id, app_state.clock.now())
        .await
        .map_err(|app_err| app_err.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::OK, Json(appointment)))
}

// POST /api/rdv/{id}/demarrer
#[utoipa::path(
    post,
    path = "/api/rdv/{id}/demarrer",
    tag = "Rendez-vous",
    params(
        ("id" = Uuid, Path, description = "ID do agendamento"),
        ("x-tenant-id" = Uuid, Header, description = "ID da rede")
    ),
    responses(
        (status = 200, description = "Controle iniciado", body = Appointment),
        (status = 409, description = "Transição não permitida")
    ),
    security(("api_jwt" = []))
)]
pub async fn demarrer(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    _guard: RequireCapability<CapRdvOperate>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let appointment = app_state
        .appointment_service
        .start(tenant.0, id, app_state.clock.now())
        .await
        .map_err(|app_err| app_err.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::OK, Json(appointment)))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct TerminerPayload {
    #[validate(nested)]
    pub resultat: Option<InspectionResult>,
}

// POST /api/rdv/{id}/terminer
#[utoipa::path(
    post,
    path = "/api/rdv/{id}/terminer",
    tag = "Rendez-vous",
    request_body = TerminerPayload,
    params(
        ("id" = Uuid, Path, description = "ID do agendamento"),
        ("x-tenant-id" = Uuid, Header, description = "ID da rede")
    ),
    responses(
        (status = 200, description = "Controle concluído", body = Appointment),
        (status = 409, description = "Transição não permitida ou resultado incoerente")
    ),
    security(("api_jwt" = []))
)]
pub async fn terminer(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    _guard: RequireCapability<CapRdvOperate>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TerminerPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::from(e).to_api_error(&locale, &app_state.i18n_store))?;

    let appointment = app_state
        .appointment_service
        .finish(tenant.0, id, payload.resultat, app_state.clock.now())
        .await
        .map_err(|app_err| app_err.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::OK, Json(appointment)))
}

// POST /api/rdv/{id}/no-show
#[utoipa::path(
    post,
    path = "/api/rdv/{id}/no-show",
    tag = "Rendez-vous",
    params(
        ("id" = Uuid, Path, description = "ID do agendamento"),
        ("x-tenant-id" = Uuid, Header, description = "ID da rede")
    ),
    responses(
        (status = 200, description = "Cliente declarado ausente", body = Appointment),
        (status = 409, description = "Transição não permitida")
    ),
    security(("api_jwt" = []))
)]
pub async fn no_show(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    _guard: RequireCapability<CapRdvOperate>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let appointment = app_state
        .appointment_service
        .no_show(tenant.0, id, app_state.clock.now())
        .await
        .map_err(|app_err| app_err.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::OK, Json(appointment)))
}

// POST /api/rdv/{id}/annuler
#[utoipa::path(
    post,
    path = "/api/rdv/{id}/annuler",
    tag = "Rendez-vous",
    params(
        ("id" = Uuid, Path, description = "ID do agendamento"),
        ("x-tenant-id" = Uuid, Header, description = "ID da rede")
    ),
    responses(
        (status = 200, description = "Agendamento cancelado", body = Appointment),
        (status = 409, description = "Fora do prazo ou transição não permitida")
    ),
    security(("api_jwt" = []))
)]
pub async fn annuler(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    user: AuthenticatedUser,
    _guard: RequireCapability<CapRdvManage>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let appointment = app_state
        .appointment_service
        .cancel(tenant.0, id, app_state.clock.now())
        .await
        .map_err(|app_err| app_err.to_api_error(&locale, &app_state.i18n_store))?;

    tracing::debug!(rdv_id = %id, sub = %user.0.sub, "Cancelamento solicitado");
    Ok((StatusCode::OK, Json(appointment)))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReplanifierPayload {
    #[schema(example = "2030-01-10")]
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "15:00")]
    pub heure_debut: NaiveTime,
    pub controleur_id: Option<Uuid>,
}

// POST /api/rdv/{id}/replanifier
#[utoipa::path(
    post,
    path = "/api/rdv/{id}/replanifier",
    tag = "Rendez-vous",
    request_body = ReplanifierPayload,
    params(
        ("id" = Uuid, Path, description = "ID do agendamento"),
        ("x-tenant-id" = Uuid, Header, description = "ID da rede")
    ),
    responses(
        (status = 200, description = "Novo agendamento criado; o antigo fica REPORTE", body = Appointment),
        (status = 409, description = "Horário indisponível ou fora do prazo")
    ),
    security(("api_jwt" = []))
)]
pub async fn replanifier(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    _guard: RequireCapability<CapRdvManage>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReplanifierPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let target = SlotTarget {
        date: payload.date,
        start_time: payload.heure_debut,
        controller_id: payload.controleur_id,
    };

    let appointment = app_state
        .appointment_service
        .reschedule(tenant.0, id, target, app_state.clock.now())
        .await
        .map_err(|app_err| app_err.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::OK, Json(appointment)))
}
