// src/db/store.rs

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::{
        appointment::{Appointment, AppointmentStatus, CancelReason, InspectionResult, PaymentState},
        payment::Payment,
        policy::TenantPolicy,
        pricing::{Promotion, Tariff},
        scheduling::{CentreDay, DurationRule, SlotClaim},
    },
};

/// Resultado de uma escrita que tenta ocupar horários.
#[derive(Debug)]
pub enum ClaimOutcome {
    Claimed(Appointment),
    /// Outro agendamento ganhou a corrida por algum bucket.
    SlotTaken,
    PromotionExhausted,
    /// O agendamento de origem não está mais no status esperado.
    StaleStatus,
}

/// Mudança de status condicional: só é aplicada se o status atual estiver em `from`.
/// Tudo o que acompanha a mudança (liberar horário, devolver uso da promoção,
/// gravar o pagamento) acontece na mesma transação.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub appointment_id: Uuid,
    pub from: Vec<AppointmentStatus>,
    pub to: AppointmentStatus,
    pub at: DateTime<Utc>,
    pub release_slot: bool,
    pub refund_promotion: bool,
    pub clear_expiry: bool,
    /// `Some(false)`: exige que ainda não haja check-in; `Some(true)`: exige check-in.
    pub expect_checked_in: Option<bool>,
    pub payment_status: Option<PaymentState>,
    pub cancel_reason: Option<CancelReason>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Json<InspectionResult>>,
    pub rescheduled_to: Option<Uuid>,
    pub payment: Option<Payment>,
}

impl StatusChange {
    pub fn new(appointment_id: Uuid, from: &[AppointmentStatus], to: AppointmentStatus, at: DateTime<Utc>) -> Self {
        Self {
            appointment_id,
            from: from.to_vec(),
            to,
            at,
            release_slot: to.releases_slot(),
            refund_promotion: false,
            clear_expiry: !to.is_provisional(),
            expect_checked_in: None,
            payment_status: None,
            cancel_reason: None,
            checked_in_at: None,
            started_at: None,
            completed_at: None,
            result: None,
            rescheduled_to: None,
            payment: None,
        }
    }

    pub fn cancel_reason(mut self, reason: CancelReason) -> Self {
        self.cancel_reason = Some(reason);
        self
    }

    pub fn payment_status(mut self, status: PaymentState) -> Self {
        self.payment_status = Some(status);
        self
    }

    pub fn refund_promotion(mut self, refund: bool) -> Self {
        self.refund_promotion = refund;
        self
    }

    pub fn expect_checked_in(mut self, expected: bool) -> Self {
        self.expect_checked_in = Some(expected);
        self
    }

    pub fn with_payment(mut self, payment: Payment) -> Self {
        self.payment = Some(payment);
        self
    }

    /// Aplica a mudança a uma cópia em memória (usado pelo store em memória).
    pub fn apply_to(&self, appointment: &Appointment) -> Appointment {
        let mut next = appointment.clone();
        next.status = self.to;
        next.updated_at = self.at;
        if let Some(s) = self.payment_status {
            next.payment_status = s;
        }
        if let Some(r) = self.cancel_reason {
            next.cancel_reason = Some(r);
        }
        if self.checked_in_at.is_some() {
            next.checked_in_at = self.checked_in_at;
        }
        if self.started_at.is_some() {
            next.started_at = self.started_at;
        }
        if self.completed_at.is_some() {
            next.completed_at = self.completed_at;
        }
        if self.result.is_some() {
            next.result = self.result.clone();
        }
        if self.clear_expiry {
            next.expires_at = None;
        }
        if self.rescheduled_to.is_some() {
            next.rescheduled_to = self.rescheduled_to;
        }
        next
    }

    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.from.contains(&appointment.status)
            && self
                .expect_checked_in
                .is_none_or(|expected| appointment.checked_in_at.is_some() == expected)
    }
}

/// Acesso ao armazenamento. A exclusividade dos horários é garantida pela
/// escrita condicional de `slot_claims`, nunca por leitura seguida de escrita.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn tenant_policy(&self, tenant_id: Uuid) -> Result<Option<TenantPolicy>, AppError>;

    /// Centro com horários, controladores, bloqueios, ocupação e agendamentos ativos de `date`.
    async fn centre_day(
        &self,
        tenant_id: Uuid,
        centre_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<CentreDay>, AppError>;

    async fn duration_rules(&self, tenant_id: Uuid, service_type: &str) -> Result<Vec<DurationRule>, AppError>;

    async fn tariffs(
        &self,
        tenant_id: Uuid,
        service_type: &str,
        vehicle_type: &str,
    ) -> Result<Vec<Tariff>, AppError>;

    /// Busca sem diferenciar maiúsculas.
    async fn promotion_by_code(&self, tenant_id: Uuid, code: &str) -> Result<Option<Promotion>, AppError>;

    /// `tenant_id = None` só para callbacks do provedor de pagamento.
    async fn appointment(&self, tenant_id: Option<Uuid>, id: Uuid) -> Result<Option<Appointment>, AppError>;

    async fn expired_reservations(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Appointment>, AppError>;

    async fn payments_for(&self, appointment_id: Uuid) -> Result<Vec<Payment>, AppError>;

    /// Upsert por (appointment_id, provider_transaction_id).
    async fn record_payment(&self, payment: &Payment) -> Result<(), AppError>;

    /// Insere o agendamento e ocupa os buckets numa única transação.
    async fn insert_reservation(&self, appointment: &Appointment, claims: &[SlotClaim]) -> Result<ClaimOutcome, AppError>;

    /// `None` quando o status atual não está em `change.from`.
    async fn apply_transition(&self, change: &StatusChange) -> Result<Option<Appointment>, AppError>;

    /// Encerra o agendamento antigo, libera seus buckets e ocupa os do novo, atomicamente.
    async fn reschedule(
        &self,
        change: &StatusChange,
        replacement: &Appointment,
        claims: &[SlotClaim],
    ) -> Result<ClaimOutcome, AppError>;
}
