// src/models/payment.rs

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::appointment::AppointmentStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "settlement_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

/// Uma tentativa de pagamento. Única por (appointment_id, provider_transaction_id).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Payment {
    pub id: Uuid,
    pub appointment_id: Uuid,
    #[schema(example = "sandbox")]
    pub provider: String,
    #[schema(example = "pi_3Nf0a2")]
    pub provider_transaction_id: String,
    pub amount: Decimal,
    pub status: SettlementStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(
        appointment_id: Uuid,
        provider: &str,
        transaction_id: &str,
        amount: Decimal,
        status: SettlementStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            appointment_id,
            provider: provider.to_string(),
            provider_transaction_id: transaction_id.to_string(),
            amount,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mesma tentativa, com novo status.
    pub fn with_status(&self, status: SettlementStatus, now: DateTime<Utc>) -> Self {
        Self {
            status,
            updated_at: now,
            ..self.clone()
        }
    }
}

/// Intenção de pagamento devolvida pelo provedor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

/// Como um callback de liquidação foi tratado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    Confirmed,
    Cancelled,
    Refunded,
    /// Callback repetido: nada mudou.
    Duplicate,
    /// Pagamento chegou tarde demais (reserva expirada/cancelada) e foi estornado.
    Reversed,
    Ignored,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BookingReceipt {
    pub rdv_id: Uuid,
    pub reference: String,
    pub statut: AppointmentStatus,
    pub date: NaiveDate,
    #[schema(example = "10:00")]
    pub heure_debut: String,
    pub client_secret: Option<String>,
    pub payment_intent_id: Option<String>,
    pub prix_base: Decimal,
    pub prix_total: Decimal,
    pub reduction: Decimal,
    pub expire_a: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: SettlementOutcome,
}
