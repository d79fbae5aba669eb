// src/models/appointment.rs

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::scheduling::hhmm;

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "rdv_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Cree,
    EnAttentePaiement,
    Confirme,
    EnCours,
    Termine,
    Annule,
    Absent,
    Reporte,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Cree => "CREE",
            AppointmentStatus::EnAttentePaiement => "EN_ATTENTE_PAIEMENT",
            AppointmentStatus::Confirme => "CONFIRME",
            AppointmentStatus::EnCours => "EN_COURS",
            AppointmentStatus::Termine => "TERMINE",
            AppointmentStatus::Annule => "ANNULE",
            AppointmentStatus::Absent => "ABSENT",
            AppointmentStatus::Reporte => "REPORTE",
        }
    }

    /// Estados que liberam o horário ao serem gravados.
    pub fn releases_slot(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Annule | AppointmentStatus::Absent | AppointmentStatus::Reporte
        )
    }

    /// O agendamento ainda segura o horário (TERMINE mantém o histórico de ocupação).
    pub fn holds_slot(&self) -> bool {
        !self.releases_slot()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Termine
                | AppointmentStatus::Annule
                | AppointmentStatus::Absent
                | AppointmentStatus::Reporte
        )
    }

    /// Reserva provisória: expira se não for confirmada a tempo.
    pub fn is_provisional(&self) -> bool {
        matches!(self, AppointmentStatus::Cree | AppointmentStatus::EnAttentePaiement)
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "rdv_payment_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    EnAttente,
    Paye,
    Echoue,
    Rembourse,
    Exonere,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "rdv_source", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceChannel {
    #[default]
    Web,
    CallCenter,
    Centre,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "rdv_cancel_reason", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    Demande,
    Expire,
    PaiementEchoue,
    Rembourse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Favorable,
    Defavorable,
}

// --- Objetos embutidos (JSONB) ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
pub struct ClientInfo {
    pub client_id: Option<Uuid>,
    #[validate(length(min = 1, message = "required"))]
    #[schema(example = "Dupont")]
    pub nom: String,
    #[schema(example = "Marie")]
    pub prenom: Option<String>,
    #[validate(email(message = "invalid_email"))]
    pub email: Option<String>,
    #[schema(example = "+33612345678")]
    pub telephone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
pub struct VehicleInfo {
    #[validate(length(min = 2, max = 16, message = "invalid_plate"))]
    #[schema(example = "AB-123-CD")]
    pub immatriculation: String,
    pub marque: Option<String>,
    pub modele: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
pub struct InspectionResult {
    pub verdict: Verdict,
    #[validate(range(min = 0))]
    #[serde(default)]
    pub defauts_mineurs: i32,
    #[validate(range(min = 0))]
    #[serde(default)]
    pub defauts_majeurs: i32,
    #[validate(range(min = 0))]
    #[serde(default)]
    pub defauts_critiques: i32,
    pub observations: Option<String>,
}

impl InspectionResult {
    /// FAVORABLE só sem falhas majeures/critiques; DEFAVORABLE exige ao menos uma.
    pub fn is_coherent(&self) -> bool {
        let blocking = self.defauts_majeurs + self.defauts_critiques;
        match self.verdict {
            Verdict::Favorable => blocking == 0,
            Verdict::Defavorable => blocking > 0,
        }
    }
}

// --- Agendamento ---

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Appointment {
    pub id: Uuid,
    #[schema(ignore)]
    pub tenant_id: Uuid,
    pub centre_id: Uuid,
    pub controller_id: Option<Uuid>,
    /// Linha de inspeção reservada.
    pub line: i16,
    #[schema(example = "RDV-300108-K4Q7ZP")]
    pub reference: String,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "10:00")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "10:30")]
    pub end_time: NaiveTime,
    /// Início em UTC, usado nas regras de prazo (24h/48h).
    pub starts_at: DateTime<Utc>,
    #[schema(example = "CTP")]
    pub service_type: String,
    #[schema(example = "VP")]
    pub vehicle_type: String,
    pub fuel_type: Option<String>,
    #[schema(value_type = ClientInfo)]
    pub client: Json<ClientInfo>,
    #[schema(value_type = VehicleInfo)]
    pub vehicle: Json<VehicleInfo>,
    pub status: AppointmentStatus,
    pub source: SourceChannel,
    #[schema(example = "78.00")]
    pub base_price: Decimal,
    #[schema(example = "7.80")]
    pub discount: Decimal,
    #[schema(example = "58.50")]
    pub amount_ht: Decimal,
    #[schema(example = "11.70")]
    pub amount_tva: Decimal,
    #[schema(example = "70.20")]
    pub amount_ttc: Decimal,
    pub promo_code: Option<String>,
    pub promotion_id: Option<Uuid>,
    pub payment_status: PaymentState,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[schema(value_type = Option<InspectionResult>)]
    pub result: Option<Json<InspectionResult>>,
    pub cancel_reason: Option<CancelReason>,
    /// Prazo da reserva provisória; nulo depois de confirmada.
    pub expires_at: Option<DateTime<Utc>>,
    pub rescheduled_from: Option<Uuid>,
    pub rescheduled_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}
