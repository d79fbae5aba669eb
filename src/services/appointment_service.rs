// src/services/appointment_service.rs
//
// Transições feitas pelo cliente e pelo console do centro.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::error::AppError,
    db::{BookingStore, StatusChange},
    models::{
        appointment::{Appointment, AppointmentStatus, CancelReason, InspectionResult, PaymentState},
        payment::{Payment, SettlementStatus},
    },
    services::{
        lifecycle::{self, DenyReason, GatePolicy},
        notification_service::{EventKind, LifecycleEvent, Notifier},
        payment_service::PaymentGateway,
        policy_service::PolicyService,
        reservation_service::{ReservationService, SlotTarget},
    },
};

use AppointmentStatus::*;

#[derive(Clone)]
pub struct AppointmentService {
    store: Arc<dyn BookingStore>,
    reservations: ReservationService,
    policies: PolicyService,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
}

impl AppointmentService {
    pub fn new(
        store: Arc<dyn BookingStore>,
        reservations: ReservationService,
        policies: PolicyService,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            reservations,
            policies,
            gateway,
            notifier,
        }
    }

    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Appointment, AppError> {
        self.store
            .appointment(Some(tenant_id), id)
            .await?
            .ok_or(AppError::AppointmentNotFound)
    }

    async fn gates(&self, tenant_id: Uuid) -> Result<GatePolicy, AppError> {
        let policy = self.policies.resolve(tenant_id).await?;
        Ok(GatePolicy::from(&policy))
    }

    /// Escrita condicional; perder a corrida vira `StatusChanged`.
    async fn commit(&self, change: StatusChange, event: Option<EventKind>) -> Result<Appointment, AppError> {
        let updated = self
            .store
            .apply_transition(&change)
            .await?
            .ok_or(AppError::TransitionNotAllowed(DenyReason::StatusChanged))?;
        tracing::info!(
            rdv_id = %updated.id,
            tenant_id = %updated.tenant_id,
            status = %updated.status,
            "Transição de agendamento aplicada"
        );
        if let Some(kind) = event {
            self.notifier.dispatch(&LifecycleEvent::of(kind, &updated, change.at));
        }
        Ok(updated)
    }

    /// Pagamentos do agendamento e dos que ele substituiu (a intenção fica no original).
    async fn payments_along_chain(&self, appointment: &Appointment) -> Result<Vec<Payment>, AppError> {
        let mut payments = self.store.payments_for(appointment.id).await?;
        let mut previous = appointment.rescheduled_from;
        while let Some(id) = previous {
            payments.extend(self.store.payments_for(id).await?);
            previous = self
                .store
                .appointment(Some(appointment.tenant_id), id)
                .await?
                .and_then(|a| a.rescheduled_from);
        }
        Ok(payments)
    }

    pub async fn check_in(&self, tenant_id: Uuid, id: Uuid, now: DateTime<Utc>) -> Result<Appointment, AppError> {
        let appointment = self.get(tenant_id, id).await?;
        lifecycle::can_check_in(appointment.status, appointment.checked_in_at.is_some())
            .map_err(AppError::TransitionNotAllowed)?;

        let mut change = StatusChange::new(id, &[Confirme], Confirme, now).expect_checked_in(false);
        change.checked_in_at = Some(now);
        self.commit(change, None).await
    }

    pub async fn start(&self, tenant_id: Uuid, id: Uuid, now: DateTime<Utc>) -> Result<Appointment, AppError> {
        let appointment = self.get(tenant_id, id).await?;
        lifecycle::can_start(appointment.status, appointment.checked_in_at.is_some())
            .map_err(AppError::TransitionNotAllowed)?;

        let mut change = StatusChange::new(id, &[Confirme], EnCours, now).expect_checked_in(true);
        change.started_at = Some(now);
        self.commit(change, None).await
    }

    pub async fn finish(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        result: Option<InspectionResult>,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppError> {
        if let Some(result) = &result {
            result.validate()?;
        }
        let appointment = self.get(tenant_id, id).await?;
        lifecycle::can_finish(appointment.status, result.as_ref()).map_err(AppError::TransitionNotAllowed)?;

        let mut change = StatusChange::new(id, &[EnCours], Termine, now);
        change.completed_at = Some(now);
        change.result = result.map(Json);
        self.commit(change, Some(EventKind::Completed)).await
    }

    pub async fn no_show(&self, tenant_id: Uuid, id: Uuid, now: DateTime<Utc>) -> Result<Appointment, AppError> {
        let appointment = self.get(tenant_id, id).await?;
        let gates = self.gates(tenant_id).await?;
        lifecycle::can_mark_absent(
            appointment.status,
            appointment.checked_in_at.is_some(),
            now,
            appointment.starts_at,
            &gates,
        )
        .map_err(AppError::TransitionNotAllowed)?;

        let change = StatusChange::new(id, &[Confirme], Absent, now).expect_checked_in(false);
        self.commit(change, Some(EventKind::NoShow)).await
    }

    /// Cancelamento pedido pelo cliente. Se já pago, o estorno é pedido ao provedor
    /// antes da escrita; se ainda não pago, o uso da promoção é devolvido.
    pub async fn cancel(&self, tenant_id: Uuid, id: Uuid, now: DateTime<Utc>) -> Result<Appointment, AppError> {
        let appointment = self.get(tenant_id, id).await?;
        let gates = self.gates(tenant_id).await?;
        lifecycle::can_transition(appointment.status, Annule, now, appointment.starts_at, &gates)
            .map_err(AppError::TransitionNotAllowed)?;

        let mut change = StatusChange::new(id, &[appointment.status], Annule, now).cancel_reason(CancelReason::Demande);

        if appointment.payment_status == PaymentState::Paye {
            let payments = self.payments_along_chain(&appointment).await?;
            let paid = payments
                .iter()
                .find(|p| p.status == SettlementStatus::Completed)
                .ok_or_else(|| {
                    AppError::ConsistencyViolation(format!("rdv {} marcado como pago sem pagamento concluído", id))
                })?;
            self.gateway
                .refund(&paid.provider_transaction_id, paid.amount)
                .await
                .map_err(|e| AppError::PaymentFailed(e.to_string()))?;
            change = change
                .payment_status(PaymentState::Rembourse)
                .with_payment(paid.with_status(SettlementStatus::Refunded, now));
        } else if appointment.payment_status != PaymentState::Exonere {
            change = change.refund_promotion(appointment.promotion_id.is_some());
        }

        self.commit(change, Some(EventKind::Cancelled)).await
    }

    pub async fn reschedule(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        target: SlotTarget,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppError> {
        let appointment = self.get(tenant_id, id).await?;
        let gates = self.gates(tenant_id).await?;
        lifecycle::can_transition(appointment.status, Reporte, now, appointment.starts_at, &gates)
            .map_err(AppError::TransitionNotAllowed)?;
        self.reservations.reschedule(&appointment, target, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::appointment::Verdict;
    use crate::test_support::fixture;
    use assert_matches::assert_matches;
    use chrono::Duration;

    #[tokio::test]
    async fn in_person_flow_reaches_termine() {
        let fx = fixture();
        let service = fx.appointments();
        let appointment = fx.confirmed(fx.at(10, 0)).await;
        let on_site = appointment.starts_at - Duration::minutes(10);

        let err = service.start(fx.tenant_id, appointment.id, on_site).await.unwrap_err();
        assert_matches!(err, AppError::TransitionNotAllowed(DenyReason::MissingCheckIn));

        let checked = service.check_in(fx.tenant_id, appointment.id, on_site).await.unwrap();
        assert_eq!(checked.status, Confirme);
        assert!(checked.checked_in_at.is_some());
        let again = service.check_in(fx.tenant_id, appointment.id, on_site).await.unwrap_err();
        assert_matches!(again, AppError::TransitionNotAllowed(DenyReason::AlreadyCheckedIn));

        let started = service.start(fx.tenant_id, appointment.id, on_site).await.unwrap();
        assert_eq!(started.status, EnCours);

        let missing = service.finish(fx.tenant_id, appointment.id, None, on_site).await.unwrap_err();
        assert_matches!(missing, AppError::TransitionNotAllowed(DenyReason::MissingResult));

        let result = InspectionResult {
            verdict: Verdict::Favorable,
            defauts_mineurs: 2,
            defauts_majeurs: 0,
            defauts_critiques: 0,
            observations: Some("RAS".into()),
        };
        let done = service
            .finish(fx.tenant_id, appointment.id, Some(result), on_site + Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(done.status, Termine);
        assert_eq!(done.result.unwrap().0.verdict, Verdict::Favorable);
    }

    #[tokio::test]
    async fn cancel_respects_the_24h_gate_inclusively() {
        let fx = fixture();
        let service = fx.appointments();
        let appointment = fx.confirmed(fx.at(10, 0)).await;

        let late = appointment.starts_at - Duration::hours(24) + Duration::seconds(1);
        let err = service.cancel(fx.tenant_id, appointment.id, late).await.unwrap_err();
        assert_matches!(err, AppError::TransitionNotAllowed(DenyReason::TooLateToCancel { .. }));

        let exactly = appointment.starts_at - Duration::hours(24);
        let cancelled = service.cancel(fx.tenant_id, appointment.id, exactly).await.unwrap();
        assert_eq!(cancelled.status, Annule);
        assert_eq!(cancelled.cancel_reason, Some(CancelReason::Demande));
        assert!(fx.memory.claims_of(appointment.id).await.is_empty());
    }

    #[tokio::test]
    async fn cancelling_a_paid_appointment_refunds_it() {
        let fx = fixture();
        let appointment = fx.confirmed(fx.at(10, 0)).await;
        let now = appointment.starts_at - Duration::days(1);

        let cancelled = fx.appointments().cancel(fx.tenant_id, appointment.id, now).await.unwrap();
        assert_eq!(cancelled.payment_status, PaymentState::Rembourse);
        assert_eq!(fx.gateway.refunds().len(), 1);
        let payments = fx.memory.payments_of(appointment.id).await;
        assert!(payments.iter().all(|p| p.status == SettlementStatus::Refunded));
    }

    #[tokio::test]
    async fn reschedule_needs_48h_and_moves_the_slot() {
        let fx = fixture();
        let service = fx.appointments();
        let later_day = fx.date + Duration::days(2);
        let appointment = fx.confirmed_on(later_day, fx.at(10, 0)).await;
        let target = SlotTarget {
            date: later_day,
            start_time: fx.at(15, 0),
            controller_id: None,
        };

        let too_late = appointment.starts_at - Duration::hours(47);
        let err = service
            .reschedule(fx.tenant_id, appointment.id, target, too_late)
            .await
            .unwrap_err();
        assert_matches!(err, AppError::TransitionNotAllowed(DenyReason::TooLateToReschedule { .. }));

        let exactly = appointment.starts_at - Duration::hours(48);
        let moved = service
            .reschedule(fx.tenant_id, appointment.id, target, exactly)
            .await
            .unwrap();
        assert_eq!(moved.status, Confirme);
        assert_eq!(moved.rescheduled_from, Some(appointment.id));
        assert_eq!(moved.amount_ttc, appointment.amount_ttc);

        let old = fx.memory.appointment_by_id(appointment.id).await.unwrap();
        assert_eq!(old.status, Reporte);
        assert_eq!(old.rescheduled_to, Some(moved.id));
        assert!(fx.memory.claims_of(appointment.id).await.is_empty());
        assert!(!fx.memory.claims_of(moved.id).await.is_empty());
    }

    #[tokio::test]
    async fn no_show_only_after_start() {
        let fx = fixture();
        let service = fx.appointments();
        let appointment = fx.confirmed(fx.at(10, 0)).await;

        let early = service
            .no_show(fx.tenant_id, appointment.id, appointment.starts_at - Duration::minutes(5))
            .await
            .unwrap_err();
        assert_matches!(early, AppError::TransitionNotAllowed(DenyReason::NotStartedYet));

        let absent = service
            .no_show(fx.tenant_id, appointment.id, appointment.starts_at + Duration::minutes(20))
            .await
            .unwrap();
        assert_eq!(absent.status, Absent);
        assert!(fx.memory.claims_of(appointment.id).await.is_empty());
        assert!(fx.notifier.kinds().contains(&EventKind::NoShow));
    }

    #[tokio::test]
    async fn other_tenant_cannot_see_the_appointment() {
        let fx = fixture();
        let appointment = fx.confirmed(fx.at(10, 0)).await;
        let err = fx.appointments().get(Uuid::new_v4(), appointment.id).await.unwrap_err();
        assert_matches!(err, AppError::AppointmentNotFound);
    }
}
