// src/services/booking_service.rs
//
// Fluxo `create-with-payment`: reserva, preço e intenção de pagamento.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::{BookingStore, StatusChange},
    models::{
        appointment::{Appointment, AppointmentStatus, CancelReason, PaymentState},
        payment::{BookingReceipt, Payment, PaymentIntent, SettlementStatus},
    },
    services::{
        lifecycle::DenyReason,
        notification_service::{EventKind, LifecycleEvent, Notifier},
        payment_service::PaymentGateway,
        policy_service::PolicyService,
        reservation_service::{ReservationRequest, ReservationService},
    },
};

fn receipt(appointment: &Appointment, intent: Option<PaymentIntent>) -> BookingReceipt {
    BookingReceipt {
        rdv_id: appointment.id,
        reference: appointment.reference.clone(),
        statut: appointment.status,
        date: appointment.date,
        heure_debut: appointment.start_time.format("%H:%M").to_string(),
        client_secret: intent.as_ref().map(|i| i.client_secret.clone()),
        payment_intent_id: intent.map(|i| i.id),
        prix_base: appointment.base_price,
        prix_total: appointment.amount_ttc,
        reduction: appointment.discount,
        expire_a: appointment.expires_at,
    }
}

#[derive(Clone)]
pub struct BookingService {
    store: Arc<dyn BookingStore>,
    reservations: ReservationService,
    policies: PolicyService,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
}

impl BookingService {
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

    /// Reserva o horário e emite a intenção de pagamento.
    /// Tenant isento ou total zero: confirma direto, sem intenção.
    pub async fn create_with_payment(
        &self,
        tenant_id: Uuid,
        request: &ReservationRequest,
        now: DateTime<Utc>,
    ) -> Result<BookingReceipt, AppError> {
        let policy = self.policies.resolve(tenant_id).await?;
        let appointment = self.reservations.reserve(tenant_id, request, now).await?;

        if policy.payment_exempt || appointment.amount_ttc.is_zero() {
            let change = StatusChange::new(
                appointment.id,
                &[AppointmentStatus::Cree],
                AppointmentStatus::Confirme,
                now,
            )
            .payment_status(PaymentState::Exonere);
            let confirmed = self
                .store
                .apply_transition(&change)
                .await?
                .ok_or(AppError::TransitionNotAllowed(DenyReason::StatusChanged))?;
            tracing::info!(rdv_id = %confirmed.id, %tenant_id, status = %confirmed.status, "Agendamento confirmado sem pagamento");
            self.notifier
                .dispatch(&LifecycleEvent::of(EventKind::Confirmed, &confirmed, now));
            return Ok(receipt(&confirmed, None));
        }

        let intent = match self.gateway.create_intent(&appointment).await {
            Ok(intent) => intent,
            Err(e) => {
                tracing::warn!(rdv_id = %appointment.id, %tenant_id, error = %e, "Provedor recusou a intenção de pagamento");
                self.reservations
                    .cancel_unpaid(&appointment, CancelReason::PaiementEchoue, None, now)
                    .await?;
                return Err(AppError::PaymentFailed(e.to_string()));
            }
        };

        let pending = Payment::new(
            appointment.id,
            self.gateway.provider(),
            &intent.id,
            appointment.amount_ttc,
            SettlementStatus::Pending,
            now,
        );
        let change = StatusChange::new(
            appointment.id,
            &[AppointmentStatus::Cree],
            AppointmentStatus::EnAttentePaiement,
            now,
        )
        .with_payment(pending);
        let Some(awaiting) = self.store.apply_transition(&change).await? else {
            // O webhook pode liquidar antes desta escrita; a linha PENDING não sobrescreve a COMPLETED.
            let current = self.store.appointment(Some(tenant_id), appointment.id).await?;
            return match current {
                Some(current) if current.status == AppointmentStatus::Confirme => {
                    tracing::info!(rdv_id = %current.id, %tenant_id, status = %current.status, "Pagamento liquidado antes do retorno da intenção");
                    Ok(receipt(&current, None))
                }
                _ => Err(AppError::TransitionNotAllowed(DenyReason::StatusChanged)),
            };
        };
        tracing::info!(
            rdv_id = %awaiting.id,
            %tenant_id,
            status = %awaiting.status,
            payment_intent_id = %intent.id,
            "Intenção de pagamento emitida"
        );
        Ok(receipt(&awaiting, Some(intent)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::policy::BookingPolicy,
        test_support::{fixture, fixture_with},
    };
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use rust_decimal::Decimal;

    /// Provedor cujo webhook de sucesso chega antes de `create_intent` retornar.
    struct SettlingGateway {
        store: Arc<dyn BookingStore>,
    }

    #[async_trait]
    impl PaymentGateway for SettlingGateway {
        fn provider(&self) -> &'static str {
            "sandbox"
        }

        async fn create_intent(&self, appointment: &Appointment) -> anyhow::Result<PaymentIntent> {
            let now = appointment.created_at;
            let completed = Payment::new(
                appointment.id,
                "sandbox",
                "pi_fast",
                appointment.amount_ttc,
                SettlementStatus::Completed,
                now,
            );
            let change = StatusChange::new(
                appointment.id,
                &[AppointmentStatus::Cree, AppointmentStatus::EnAttentePaiement],
                AppointmentStatus::Confirme,
                now,
            )
            .payment_status(PaymentState::Paye)
            .with_payment(completed);
            self.store.apply_transition(&change).await?;
            Ok(PaymentIntent {
                id: "pi_fast".into(),
                client_secret: "pi_fast_secret".into(),
            })
        }

        async fn refund(&self, _transaction_id: &str, _amount: Decimal) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn booking_issues_an_intent_and_waits_for_payment() {
        let fx = fixture();
        let receipt = fx.book(fx.at(10, 0)).await;
        assert_eq!(receipt.statut, AppointmentStatus::EnAttentePaiement);
        assert!(receipt.client_secret.is_some());
        assert!(receipt.reference.starts_with("RDV-300108-"));
        assert_eq!(receipt.prix_total, "78.00".parse::<rust_decimal::Decimal>().unwrap());

        let payments = fx.memory.payments_of(receipt.rdv_id).await;
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, SettlementStatus::Pending);
        assert_eq!(Some(payments[0].provider_transaction_id.clone()), receipt.payment_intent_id);
    }

    #[tokio::test]
    async fn declined_intent_releases_the_slot() {
        let fx = fixture_with(|options| options.declining_gateway = true);
        let err = fx
            .bookings()
            .create_with_payment(fx.tenant_id, &fx.request(fx.at(10, 0)), fx.now)
            .await
            .unwrap_err();
        assert_matches!(err, AppError::PaymentFailed(_));
        assert!(fx.memory.claims().await.is_empty());
    }

    #[tokio::test]
    async fn exempt_tenant_is_confirmed_without_intent() {
        let fx = fixture_with(|options| options.payment_exempt = true);
        let receipt = fx
            .bookings()
            .create_with_payment(fx.tenant_id, &fx.request(fx.at(10, 0)), fx.now)
            .await
            .unwrap();
        assert_eq!(receipt.statut, AppointmentStatus::Confirme);
        assert!(receipt.client_secret.is_none());
        assert_eq!(receipt.expire_a, None);
        assert_eq!(fx.notifier.kinds(), vec![EventKind::Confirmed]);
    }

    #[tokio::test]
    async fn settlement_racing_the_intent_still_books() {
        let fx = fixture();
        let bookings = BookingService::new(
            fx.store.clone(),
            fx.reservations(),
            PolicyService::new(fx.store.clone(), BookingPolicy::default()),
            Arc::new(SettlingGateway { store: fx.store.clone() }),
            fx.notifier.clone(),
        );

        let receipt = bookings
            .create_with_payment(fx.tenant_id, &fx.request(fx.at(10, 0)), fx.now)
            .await
            .unwrap();
        assert_eq!(receipt.statut, AppointmentStatus::Confirme);
        assert!(receipt.client_secret.is_none());

        let payments = fx.memory.payments_of(receipt.rdv_id).await;
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, SettlementStatus::Completed);
        let stored = fx.memory.appointment_by_id(receipt.rdv_id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentState::Paye);
    }
}
