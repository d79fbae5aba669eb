// src/docs.rs

use utoipa::OpenApi;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use crate::handlers;
use crate::models;
use crate::services;

#[derive(OpenApi)]
#[openapi(
    paths(
        // --- Disponibilités ---
        handlers::availability::get_disponibilites,
        handlers::availability::get_dates_disponibles,
        handlers::availability::get_planning,

        // --- Rendez-vous ---
        handlers::appointments::create_with_payment,
        handlers::appointments::get_rdv,
        handlers::appointments::checkin,
        handlers::appointments::demarrer,
        handlers::appointments::terminer,
        handlers::appointments::no_show,
        handlers::appointments::annuler,
        handlers::appointments::replanifier,

        // --- Paiements ---
        handlers::payments::check_promo,
        handlers::payments::webhook,
    ),
    components(
        schemas(
            // --- Scheduling ---
            models::scheduling::Creneau,
            models::scheduling::AvailabilityResponse,
            models::scheduling::AvailableDatesResponse,
            models::scheduling::PlanningSlot,
            models::scheduling::PlanningResponse,
            services::availability_service::DisplayMode,

            // --- Appointment ---
            models::appointment::AppointmentStatus,
            models::appointment::PaymentState,
            models::appointment::SourceChannel,
            models::appointment::CancelReason,
            models::appointment::Verdict,
            models::appointment::ClientInfo,
            models::appointment::VehicleInfo,
            models::appointment::InspectionResult,
            models::appointment::Appointment,

            // --- Pricing / Payment ---
            models::pricing::DiscountKind,
            models::pricing::PromoRejection,
            models::pricing::PromoCheckResponse,
            models::payment::SettlementOutcome,
            models::payment::BookingReceipt,
            models::payment::WebhookAck,

            // --- Payloads ---
            handlers::appointments::CreateRdvPayload,
            handlers::appointments::TerminerPayload,
            handlers::appointments::ReplanifierPayload,
            handlers::payments::CheckPromoPayload,
            handlers::payments::WebhookPayload,
        )
    ),
    tags(
        (name = "Disponibilités", description = "Créneaux livres e planning do centro"),
        (name = "Rendez-vous", description = "Reserva e ciclo de vida do agendamento"),
        (name = "Paiements", description = "Códigos promocionais e callbacks do provedor")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "api_jwt",
            SecurityScheme::Http(
                Http::new(HttpAuthScheme::Bearer)
            ),
        );
    }
}
