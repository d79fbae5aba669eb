// src/services/payment_service.rs

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::{BookingStore, StatusChange},
    models::{
        appointment::{Appointment, AppointmentStatus, CancelReason, PaymentState},
        payment::{Payment, PaymentIntent, SettlementOutcome, SettlementStatus},
    },
    services::{
        notification_service::{EventKind, LifecycleEvent, Notifier},
        reservation_service::ReservationService,
    },
};

/// Limite de saltos ao seguir a cadeia de replanificações.
const MAX_CHAIN_HOPS: usize = 16;

/// Provedor de pagamento externo.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> &'static str;

    async fn create_intent(&self, appointment: &Appointment) -> anyhow::Result<PaymentIntent>;

    async fn refund(&self, transaction_id: &str, amount: Decimal) -> anyhow::Result<()>;
}

/// Provedor de desenvolvimento: fabrica ids e segredos, registra estornos.
#[derive(Default)]
pub struct SandboxGateway {
    decline: bool,
    refunds: Mutex<Vec<(String, Decimal)>>,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recusa toda criação de intenção.
    pub fn declining() -> Self {
        Self {
            decline: true,
            ..Self::default()
        }
    }

    pub fn refunds(&self) -> Vec<(String, Decimal)> {
        self.refunds.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    fn provider(&self) -> &'static str {
        "sandbox"
    }

    async fn create_intent(&self, appointment: &Appointment) -> anyhow::Result<PaymentIntent> {
        if self.decline {
            anyhow::bail!("sandbox: intenção recusada para {}", appointment.reference);
        }
        let id = format!("pi_{}", Uuid::new_v4().simple());
        let client_secret = format!("{}_secret_{}", id, Uuid::new_v4().simple());
        Ok(PaymentIntent { id, client_secret })
    }

    async fn refund(&self, transaction_id: &str, amount: Decimal) -> anyhow::Result<()> {
        tracing::info!(transaction_id, %amount, "sandbox: estorno registrado");
        self.refunds
            .lock()
            .map_err(|_| anyhow::anyhow!("sandbox: lock de estornos envenenado"))?
            .push((transaction_id.to_string(), amount));
        Ok(())
    }
}

/// Traduz o status do provedor. `None`: status que não interessa ao ciclo de vida.
pub fn map_provider_status(raw: &str) -> Option<SettlementStatus> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "succeeded" | "paid" | "captured" | "completed" => Some(SettlementStatus::Completed),
        "failed" | "canceled" | "cancelled" | "refused" | "expired" => Some(SettlementStatus::Failed),
        "refunded" => Some(SettlementStatus::Refunded),
        _ => None,
    }
}

/// Callback de liquidação já autenticado.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub appointment_id: Uuid,
    pub transaction_id: String,
    pub status: SettlementStatus,
    pub amount: Option<Decimal>,
}

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn BookingStore>,
    reservations: ReservationService,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn BookingStore>,
        reservations: ReservationService,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            reservations,
            gateway,
            notifier,
        }
    }

    /// Segue `rescheduled_to` até o agendamento vivo.
    async fn live_appointment(&self, id: Uuid) -> Result<Option<Appointment>, AppError> {
        let Some(mut current) = self.store.appointment(None, id).await? else {
            return Ok(None);
        };
        for _ in 0..MAX_CHAIN_HOPS {
            match (current.status, current.rescheduled_to) {
                (AppointmentStatus::Reporte, Some(next)) => match self.store.appointment(None, next).await? {
                    Some(appointment) => current = appointment,
                    None => break,
                },
                _ => break,
            }
        }
        Ok(Some(current))
    }

    fn payment_row(&self, settlement: &Settlement, status: SettlementStatus, now: DateTime<Utc>) -> Payment {
        Payment::new(
            settlement.appointment_id,
            self.gateway.provider(),
            &settlement.transaction_id,
            settlement.amount.unwrap_or_default(),
            status,
            now,
        )
    }

    /// Estorna um pagamento que não pode confirmar nada e grava a tentativa como REFUNDED.
    async fn reverse(&self, settlement: &Settlement, amount: Decimal, now: DateTime<Utc>) -> Result<(), AppError> {
        self.gateway.refund(&settlement.transaction_id, amount).await?;
        let mut row = self.payment_row(settlement, SettlementStatus::Refunded, now);
        row.amount = amount;
        self.store.record_payment(&row).await
    }

    /// Reconciliação idempotente por (appointment_id, transaction_id).
    pub async fn settle(&self, settlement: &Settlement, now: DateTime<Utc>) -> Result<SettlementOutcome, AppError> {
        let Some(live) = self.live_appointment(settlement.appointment_id).await? else {
            tracing::warn!(rdv_id = %settlement.appointment_id, "Callback de pagamento para agendamento desconhecido");
            return Ok(SettlementOutcome::Ignored);
        };

        let previous = self
            .store
            .payments_for(settlement.appointment_id)
            .await?
            .into_iter()
            .find(|p| p.provider_transaction_id == settlement.transaction_id);
        let already = previous.as_ref().map(|p| p.status);

        match settlement.status {
            SettlementStatus::Completed => {
                if matches!(already, Some(SettlementStatus::Completed | SettlementStatus::Refunded)) {
                    return Ok(SettlementOutcome::Duplicate);
                }
                self.complete(settlement, &live, now).await
            }
            SettlementStatus::Failed => {
                if already.is_some_and(|s| s != SettlementStatus::Pending) {
                    return Ok(SettlementOutcome::Duplicate);
                }
                let row = self.payment_row(settlement, SettlementStatus::Failed, now);
                match self
                    .reservations
                    .cancel_unpaid(&live, CancelReason::PaiementEchoue, Some(row.clone()), now)
                    .await?
                {
                    Some(_) => Ok(SettlementOutcome::Cancelled),
                    None => {
                        self.store.record_payment(&row).await?;
                        Ok(SettlementOutcome::Ignored)
                    }
                }
            }
            SettlementStatus::Refunded => {
                if already == Some(SettlementStatus::Refunded) {
                    return Ok(SettlementOutcome::Duplicate);
                }
                let mut row = self.payment_row(settlement, SettlementStatus::Refunded, now);
                if let Some(previous) = &previous {
                    row.amount = previous.amount;
                }
                if live.status == AppointmentStatus::Confirme {
                    // Estorno iniciado no provedor: o agendamento deixa de valer.
                    let change = StatusChange::new(live.id, &[AppointmentStatus::Confirme], AppointmentStatus::Annule, now)
                        .cancel_reason(CancelReason::Rembourse)
                        .payment_status(PaymentState::Rembourse)
                        .with_payment(row.clone());
                    if let Some(cancelled) = self.store.apply_transition(&change).await? {
                        tracing::info!(rdv_id = %cancelled.id, tenant_id = %cancelled.tenant_id, status = %cancelled.status, "Agendamento cancelado por estorno do provedor");
                        self.notifier
                            .dispatch(&LifecycleEvent::of(EventKind::Cancelled, &cancelled, now));
                        return Ok(SettlementOutcome::Refunded);
                    }
                }
                self.store.record_payment(&row).await?;
                Ok(SettlementOutcome::Refunded)
            }
            SettlementStatus::Pending => Ok(SettlementOutcome::Ignored),
        }
    }

    async fn complete(
        &self,
        settlement: &Settlement,
        live: &Appointment,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome, AppError> {
        let amount = settlement.amount.unwrap_or(live.amount_ttc);

        if amount != live.amount_ttc {
            tracing::warn!(
                rdv_id = %live.id,
                expected = %live.amount_ttc,
                received = %amount,
                "Valor liquidado difere do total; tratado como falha"
            );
            self.reverse(settlement, amount, now).await?;
            self.reservations
                .cancel_unpaid(live, CancelReason::PaiementEchoue, None, now)
                .await?;
            return Ok(SettlementOutcome::Reversed);
        }

        if !live.status.is_provisional() {
            if live.payment_status == PaymentState::Paye {
                // Segunda transação concluída para o mesmo agendamento: cobrança em dobro.
                tracing::error!(
                    target: "ctrdv::consistency",
                    alert = true,
                    rdv_id = %live.id,
                    transaction_id = %settlement.transaction_id,
                    "Transação concluída para agendamento já pago; estornando"
                );
            } else {
                tracing::warn!(rdv_id = %live.id, status = %live.status, "Pagamento chegou tarde; estornando");
            }
            self.reverse(settlement, amount, now).await?;
            return Ok(SettlementOutcome::Reversed);
        }

        let mut row = self.payment_row(settlement, SettlementStatus::Completed, now);
        row.amount = amount;
        let change = StatusChange::new(
            live.id,
            &[AppointmentStatus::Cree, AppointmentStatus::EnAttentePaiement],
            AppointmentStatus::Confirme,
            now,
        )
        .payment_status(PaymentState::Paye)
        .with_payment(row);

        match self.store.apply_transition(&change).await? {
            Some(confirmed) => {
                tracing::info!(
                    rdv_id = %confirmed.id,
                    tenant_id = %confirmed.tenant_id,
                    status = %confirmed.status,
                    transaction_id = %settlement.transaction_id,
                    "Pagamento confirmado"
                );
                self.notifier
                    .dispatch(&LifecycleEvent::of(EventKind::Confirmed, &confirmed, now));
                Ok(SettlementOutcome::Confirmed)
            }
            None => {
                // Outro callback ou a varredura chegou antes: decide pelo estado atual.
                let same_txn_confirmed = self
                    .store
                    .payments_for(settlement.appointment_id)
                    .await?
                    .iter()
                    .any(|p| p.provider_transaction_id == settlement.transaction_id && p.status == SettlementStatus::Completed);
                if same_txn_confirmed {
                    return Ok(SettlementOutcome::Duplicate);
                }
                self.reverse(settlement, amount, now).await?;
                Ok(SettlementOutcome::Reversed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixture;
    use chrono::Duration;

    #[test]
    fn provider_statuses_are_mapped() {
        assert_eq!(map_provider_status("succeeded"), Some(SettlementStatus::Completed));
        assert_eq!(map_provider_status(" PAID "), Some(SettlementStatus::Completed));
        assert_eq!(map_provider_status("canceled"), Some(SettlementStatus::Failed));
        assert_eq!(map_provider_status("refunded"), Some(SettlementStatus::Refunded));
        assert_eq!(map_provider_status("requires_action"), None);
    }

    #[tokio::test]
    async fn duplicate_completed_callbacks_confirm_once() {
        let fx = fixture();
        let receipt = fx.book(fx.at(10, 0)).await;
        let settlement = fx.settlement(&receipt, SettlementStatus::Completed);
        let payments = fx.payments();

        assert_eq!(payments.settle(&settlement, fx.now).await.unwrap(), SettlementOutcome::Confirmed);
        assert_eq!(payments.settle(&settlement, fx.now).await.unwrap(), SettlementOutcome::Duplicate);

        let appointment = fx.memory.appointment_by_id(receipt.rdv_id).await.unwrap();
        assert_eq!(appointment.status, AppointmentStatus::Confirme);
        assert_eq!(appointment.payment_status, PaymentState::Paye);
        assert_eq!(appointment.expires_at, None);
        assert_eq!(fx.notifier.kinds(), vec![EventKind::Confirmed]);
    }

    #[tokio::test]
    async fn failed_payment_cancels_and_frees_the_slot() {
        let fx = fixture();
        let receipt = fx.book(fx.at(10, 0)).await;
        let settlement = fx.settlement(&receipt, SettlementStatus::Failed);

        let outcome = fx.payments().settle(&settlement, fx.now).await.unwrap();
        assert_eq!(outcome, SettlementOutcome::Cancelled);
        let appointment = fx.memory.appointment_by_id(receipt.rdv_id).await.unwrap();
        assert_eq!(appointment.status, AppointmentStatus::Annule);
        assert_eq!(appointment.cancel_reason, Some(CancelReason::PaiementEchoue));
        assert!(fx.memory.claims_of(receipt.rdv_id).await.is_empty());

        let again = fx.payments().settle(&settlement, fx.now).await.unwrap();
        assert_eq!(again, SettlementOutcome::Duplicate);
    }

    #[tokio::test]
    async fn late_payment_after_expiry_is_reversed() {
        let fx = fixture();
        let receipt = fx.book(fx.at(10, 0)).await;
        let later = fx.now + Duration::minutes(20);
        fx.reservations().expire_stale(later).await.unwrap();

        let settlement = fx.settlement(&receipt, SettlementStatus::Completed);
        let outcome = fx.payments().settle(&settlement, later).await.unwrap();
        assert_eq!(outcome, SettlementOutcome::Reversed);

        let appointment = fx.memory.appointment_by_id(receipt.rdv_id).await.unwrap();
        assert_eq!(appointment.status, AppointmentStatus::Annule);
        assert_eq!(fx.gateway.refunds().len(), 1);
    }

    #[tokio::test]
    async fn second_transaction_on_a_paid_appointment_is_refunded() {
        let fx = fixture();
        let receipt = fx.book(fx.at(10, 0)).await;
        let payments = fx.payments();
        payments
            .settle(&fx.settlement(&receipt, SettlementStatus::Completed), fx.now)
            .await
            .unwrap();

        let mut other = fx.settlement(&receipt, SettlementStatus::Completed);
        other.transaction_id = "pi_other".into();
        assert_eq!(payments.settle(&other, fx.now).await.unwrap(), SettlementOutcome::Reversed);
        assert_eq!(fx.gateway.refunds(), vec![("pi_other".to_string(), receipt.prix_total)]);
    }

    #[tokio::test]
    async fn wrong_amount_is_treated_as_failure() {
        let fx = fixture();
        let receipt = fx.book(fx.at(10, 0)).await;
        let mut settlement = fx.settlement(&receipt, SettlementStatus::Completed);
        settlement.amount = Some(Decimal::ONE);

        assert_eq!(fx.payments().settle(&settlement, fx.now).await.unwrap(), SettlementOutcome::Reversed);
        let appointment = fx.memory.appointment_by_id(receipt.rdv_id).await.unwrap();
        assert_eq!(appointment.status, AppointmentStatus::Annule);
    }

    #[tokio::test]
    async fn callback_follows_the_reschedule_chain() {
        let fx = fixture();
        let day = fx.date + Duration::days(3);
        let receipt = fx.book_on(day, fx.at(10, 0)).await;
        let moved = fx
            .appointments()
            .reschedule(
                fx.tenant_id,
                receipt.rdv_id,
                crate::services::reservation_service::SlotTarget {
                    date: day,
                    start_time: fx.at(16, 0),
                    controller_id: None,
                },
                fx.now,
            )
            .await
            .unwrap();

        let outcome = fx
            .payments()
            .settle(&fx.settlement(&receipt, SettlementStatus::Completed), fx.now)
            .await
            .unwrap();
        assert_eq!(outcome, SettlementOutcome::Confirmed);
        let live = fx.memory.appointment_by_id(moved.id).await.unwrap();
        assert_eq!(live.status, AppointmentStatus::Confirme);
    }
}
