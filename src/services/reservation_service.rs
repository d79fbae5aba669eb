// src/services/reservation_service.rs
//
// Único ponto que ocupa e libera horários. Toda escrita em `slot_claims`
// passa por aqui.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::{BookingStore, ClaimOutcome, StatusChange},
    models::{
        appointment::{
            Appointment, AppointmentStatus, CancelReason, ClientInfo, PaymentState, SourceChannel, VehicleInfo,
        },
        payment::Payment,
        pricing::PromoRejection,
        scheduling::SlotClaim,
    },
    services::{
        availability_service::{AvailabilityService, DayPlan, SlotQuery},
        lifecycle,
        notification_service::{EventKind, LifecycleEvent, Notifier},
        policy_service::PolicyService,
        pricing_service::PricingService,
        slot_model,
    },
};

/// Quantos agendamentos expirados cada passada da varredura processa.
const SWEEP_BATCH: i64 = 100;

const REFERENCE_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

#[derive(Debug, Clone)]
pub struct ReservationRequest {
    pub centre_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub service_type: String,
    pub vehicle_type: String,
    pub fuel_type: Option<String>,
    pub controller_id: Option<Uuid>,
    pub client: ClientInfo,
    pub vehicle: VehicleInfo,
    pub source: SourceChannel,
    pub promo_code: Option<String>,
    /// Total exibido ao cliente; se divergir do recalculado, a reserva é recusada.
    pub expected_total: Option<Decimal>,
}

#[derive(Debug, Clone, Copy)]
pub struct SlotTarget {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub controller_id: Option<Uuid>,
}

/// `RDV-AAMMDD-XXXXXX`, com 6 caracteres base32 tirados de `seed`.
pub fn reference_for(date: NaiveDate, seed: Uuid) -> String {
    let mut bits = seed.as_u128();
    let code: String = (0..6)
        .map(|_| {
            let c = REFERENCE_ALPHABET[(bits & 31) as usize] as char;
            bits >>= 5;
            c
        })
        .collect();
    format!("RDV-{}-{}", date.format("%y%m%d"), code)
}

/// Buckets do controlador e da linha ocupados pelo agendamento.
pub fn slot_claims(appointment: &Appointment, granularity: i64) -> Vec<SlotClaim> {
    let start = slot_model::minute_of(appointment.start_time);
    let duration = appointment.minutes();
    let mut keys = vec![slot_model::line_key(appointment.centre_id, appointment.line)];
    if let Some(controller_id) = appointment.controller_id {
        keys.insert(0, slot_model::controller_key(controller_id));
    }
    keys.iter()
        .flat_map(|key| {
            slot_model::claims_for(
                key,
                appointment.centre_id,
                appointment.id,
                appointment.date,
                start,
                duration,
                granularity,
            )
        })
        .collect()
}

/// Controladores livres no horário pedido, cada um com a primeira linha livre.
fn candidates(plan: &DayPlan, start: i64, controller_id: Option<Uuid>) -> Vec<(Uuid, i16)> {
    plan.slots
        .iter()
        .filter(|s| s.start == start && s.disponible)
        .filter(|s| controller_id.is_none_or(|wanted| wanted == s.controller_id))
        .filter_map(|s| s.free_lines.first().map(|line| (s.controller_id, *line)))
        .collect()
}

#[derive(Clone)]
pub struct ReservationService {
    store: Arc<dyn BookingStore>,
    availability: AvailabilityService,
    pricing: PricingService,
    policies: PolicyService,
    notifier: Arc<dyn Notifier>,
}

impl ReservationService {
    pub fn new(
        store: Arc<dyn BookingStore>,
        availability: AvailabilityService,
        pricing: PricingService,
        policies: PolicyService,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            availability,
            pricing,
            policies,
            notifier,
        }
    }

    /// Ocupa o horário e cria o agendamento provisório (CREE).
    /// Perder a corrida devolve `SlotUnavailable`; o mesmo horário nunca é retentado.
    pub async fn reserve(
        &self,
        tenant_id: Uuid,
        request: &ReservationRequest,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppError> {
        let policy = self.policies.resolve(tenant_id).await?;

        let quote = self
            .pricing
            .quote(
                tenant_id,
                request.centre_id,
                &request.service_type,
                &request.vehicle_type,
                request.promo_code.as_deref(),
                now,
            )
            .await?;
        if let Some(expected) = request.expected_total {
            if expected != quote.total {
                return Err(AppError::PriceChanged {
                    expected,
                    actual: quote.total,
                });
            }
        }

        let query = SlotQuery {
            centre_id: request.centre_id,
            date: request.date,
            service_type: request.service_type.clone(),
            vehicle_type: Some(request.vehicle_type.clone()),
            fuel_type: request.fuel_type.clone(),
        };
        let plan = self
            .availability
            .day_plan(tenant_id, &query, &policy, now, true, None)
            .await?
            .ok_or(AppError::SlotUnavailable)?;

        let centre = &plan.day.centre;
        let id = Uuid::new_v4();
        let template = Appointment {
            id,
            tenant_id,
            centre_id: centre.id,
            controller_id: None,
            line: 0,
            reference: reference_for(request.date, Uuid::new_v4()),
            date: request.date,
            start_time: request.start_time,
            end_time: slot_model::end_time(request.start_time, plan.duration),
            starts_at: centre.instant_of(request.date, request.start_time),
            service_type: request.service_type.clone(),
            vehicle_type: request.vehicle_type.clone(),
            fuel_type: request.fuel_type.clone(),
            client: Json(request.client.clone()),
            vehicle: Json(request.vehicle.clone()),
            status: AppointmentStatus::Cree,
            source: request.source,
            base_price: quote.base,
            discount: quote.discount,
            amount_ht: quote.amount_ht,
            amount_tva: quote.amount_tva,
            amount_ttc: quote.total,
            promo_code: quote.promotion.as_ref().map(|p| p.code.clone()),
            promotion_id: quote.promotion.as_ref().map(|p| p.id),
            payment_status: PaymentState::EnAttente,
            checked_in_at: None,
            started_at: None,
            completed_at: None,
            result: None,
            cancel_reason: None,
            expires_at: Some(now + policy.reservation_ttl),
            rescheduled_from: None,
            rescheduled_to: None,
            created_at: now,
            updated_at: now,
        };

        let start = slot_model::minute_of(request.start_time);
        for (controller_id, line) in candidates(&plan, start, request.controller_id) {
            let appointment = Appointment {
                controller_id: Some(controller_id),
                line,
                ..template.clone()
            };
            let claims = slot_claims(&appointment, plan.granularity);
            match self.store.insert_reservation(&appointment, &claims).await? {
                ClaimOutcome::Claimed(created) => {
                    tracing::info!(
                        rdv_id = %created.id,
                        %tenant_id,
                        status = %created.status,
                        reference = %created.reference,
                        controller_id = %controller_id,
                        line,
                        "Horário reservado"
                    );
                    return Ok(created);
                }
                ClaimOutcome::SlotTaken => {
                    tracing::debug!(%tenant_id, %controller_id, date = %request.date, start = %request.start_time, "Corrida perdida pelo horário");
                }
                ClaimOutcome::PromotionExhausted => {
                    return Err(AppError::PromoInvalid(PromoRejection::Exhausted));
                }
                ClaimOutcome::StaleStatus => {}
            }
        }
        Err(AppError::SlotUnavailable)
    }

    /// Encerra o agendamento como REPORTE e ocupa o novo horário na mesma transação.
    /// Os prazos já foram verificados por quem chama.
    pub async fn reschedule(
        &self,
        old: &Appointment,
        target: SlotTarget,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppError> {
        let policy = self.policies.resolve(old.tenant_id).await?;
        let query = SlotQuery {
            centre_id: old.centre_id,
            date: target.date,
            service_type: old.service_type.clone(),
            vehicle_type: Some(old.vehicle_type.clone()),
            fuel_type: old.fuel_type.clone(),
        };
        let plan = self
            .availability
            .day_plan(old.tenant_id, &query, &policy, now, true, Some(old.id))
            .await?
            .ok_or(AppError::SlotUnavailable)?;
        let centre = &plan.day.centre;

        let start = slot_model::minute_of(target.start_time);
        for (controller_id, line) in candidates(&plan, start, target.controller_id) {
            let new_id = Uuid::new_v4();
            let replacement = Appointment {
                id: new_id,
                reference: reference_for(target.date, Uuid::new_v4()),
                controller_id: Some(controller_id),
                line,
                date: target.date,
                start_time: target.start_time,
                end_time: slot_model::end_time(target.start_time, plan.duration),
                starts_at: centre.instant_of(target.date, target.start_time),
                checked_in_at: None,
                started_at: None,
                completed_at: None,
                result: None,
                cancel_reason: None,
                rescheduled_from: Some(old.id),
                rescheduled_to: None,
                created_at: now,
                updated_at: now,
                ..old.clone()
            };
            let mut change = StatusChange::new(old.id, &[old.status], AppointmentStatus::Reporte, now);
            change.rescheduled_to = Some(new_id);

            let claims = slot_claims(&replacement, plan.granularity);
            match self.store.reschedule(&change, &replacement, &claims).await? {
                ClaimOutcome::Claimed(created) => {
                    tracing::info!(
                        rdv_id = %old.id,
                        new_rdv_id = %created.id,
                        tenant_id = %old.tenant_id,
                        status = %created.status,
                        "Agendamento replanificado"
                    );
                    self.notifier
                        .dispatch(&LifecycleEvent::of(EventKind::Rescheduled, &created, now));
                    return Ok(created);
                }
                ClaimOutcome::SlotTaken | ClaimOutcome::PromotionExhausted => {
                    tracing::debug!(rdv_id = %old.id, %controller_id, "Corrida perdida na replanificação");
                }
                ClaimOutcome::StaleStatus => {
                    return Err(AppError::TransitionNotAllowed(lifecycle::DenyReason::StatusChanged));
                }
            }
        }
        Err(AppError::SlotUnavailable)
    }

    /// Cancelamento iniciado pelo sistema de uma reserva ainda não paga
    /// (expiração, falha de pagamento). Libera o horário e devolve o uso da promoção.
    /// `None` se o agendamento já saiu do estado provisório.
    pub async fn cancel_unpaid(
        &self,
        appointment: &Appointment,
        reason: CancelReason,
        payment: Option<Payment>,
        now: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppError> {
        if lifecycle::can_system_transition(appointment.status, AppointmentStatus::Annule).is_err()
            || !appointment.status.is_provisional()
        {
            return Ok(None);
        }
        let mut change = StatusChange::new(
            appointment.id,
            &[AppointmentStatus::Cree, AppointmentStatus::EnAttentePaiement],
            AppointmentStatus::Annule,
            now,
        )
        .cancel_reason(reason)
        .refund_promotion(appointment.promotion_id.is_some());
        if reason == CancelReason::PaiementEchoue {
            change = change.payment_status(PaymentState::Echoue);
        }
        if let Some(payment) = payment {
            change = change.with_payment(payment);
        }

        let cancelled = self.store.apply_transition(&change).await?;
        if let Some(cancelled) = &cancelled {
            tracing::info!(
                rdv_id = %cancelled.id,
                tenant_id = %cancelled.tenant_id,
                status = %cancelled.status,
                reason = ?reason,
                "Reserva provisória cancelada; horário liberado"
            );
            let kind = match reason {
                CancelReason::Expire => EventKind::Expired,
                _ => EventKind::Cancelled,
            };
            self.notifier.dispatch(&LifecycleEvent::of(kind, cancelled, now));
        }
        Ok(cancelled)
    }

    /// Varredura periódica: cancela reservas provisórias vencidas.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let expired = self.store.expired_reservations(now, SWEEP_BATCH).await?;
        let mut count = 0;
        for appointment in &expired {
            if self
                .cancel_unpaid(appointment, CancelReason::Expire, None, now)
                .await?
                .is_some()
            {
                count += 1;
            }
        }
        if count > 0 {
            tracing::info!(count, "Reservas expiradas liberadas");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::availability_service::DisplayMode;
    use crate::test_support::fixture;
    use assert_matches::assert_matches;
    use chrono::Duration;

    #[test]
    fn reference_has_date_and_six_chars() {
        let date = NaiveDate::from_ymd_opt(2030, 1, 8).unwrap();
        let reference = reference_for(date, Uuid::new_v4());
        assert!(reference.starts_with("RDV-300108-"), "{}", reference);
        assert_eq!(reference.len(), "RDV-300108-".len() + 6);
        assert!(reference[11..].bytes().all(|b| REFERENCE_ALPHABET.contains(&b)));
    }

    #[tokio::test]
    async fn scenario_b_reserved_slot_is_no_longer_offered() {
        let fx = fixture();
        let reservations = fx.reservations();
        let appointment = reservations
            .reserve(fx.tenant_id, &fx.request(fx.at(10, 0)), fx.now)
            .await
            .unwrap();
        assert_eq!(appointment.status, AppointmentStatus::Cree);
        assert_eq!(appointment.expires_at, Some(fx.now + Duration::minutes(15)));

        let slots = fx
            .availability()
            .slots(fx.tenant_id, &fx.query(), DisplayMode::Any, fx.now)
            .await
            .unwrap();
        let ten = slots.creneaux.iter().find(|c| c.heure_debut == fx.at(10, 0)).unwrap();
        assert!(!ten.disponible);
        assert_eq!(slots.creneaux.iter().filter(|c| c.disponible).count(), 19);
    }

    #[tokio::test]
    async fn concurrent_reservations_have_one_winner() {
        let fx = fixture();
        let reservations = fx.reservations();
        let attempts = (0..8).map(|_| {
            let reservations = reservations.clone();
            let request = fx.request(fx.at(10, 0));
            let tenant_id = fx.tenant_id;
            let now = fx.now;
            tokio::spawn(async move { reservations.reserve(tenant_id, &request, now).await })
        });
        let mut won = 0;
        let mut lost = 0;
        for handle in attempts.collect::<Vec<_>>() {
            match handle.await.unwrap() {
                Ok(_) => won += 1,
                Err(AppError::SlotUnavailable) => lost += 1,
                Err(other) => panic!("erro inesperado: {:?}", other),
            }
        }
        assert_eq!(won, 1);
        assert_eq!(lost, 7);
    }

    #[tokio::test]
    async fn stale_expected_price_is_refused_before_claiming() {
        let fx = fixture();
        let mut request = fx.request(fx.at(10, 0));
        request.expected_total = Some("70.00".parse().unwrap());
        let err = fx.reservations().reserve(fx.tenant_id, &request, fx.now).await.unwrap_err();
        assert_matches!(err, AppError::PriceChanged { .. });
        assert!(fx.memory.claims().await.is_empty());
    }

    #[tokio::test]
    async fn scenario_c_expired_reservation_frees_the_slot() {
        let fx = fixture();
        let reservations = fx.reservations();
        let mut request = fx.request(fx.at(10, 0));
        request.promo_code = Some("SUMMER10".into());
        let appointment = reservations.reserve(fx.tenant_id, &request, fx.now).await.unwrap();
        assert_eq!(fx.memory.promotion_uses("SUMMER10").await, 1);

        assert_eq!(reservations.expire_stale(fx.now + Duration::minutes(14)).await.unwrap(), 0);
        let later = fx.now + Duration::minutes(16);
        assert_eq!(reservations.expire_stale(later).await.unwrap(), 1);

        let expired = fx.memory.appointment_by_id(appointment.id).await.unwrap();
        assert_eq!(expired.status, AppointmentStatus::Annule);
        assert_eq!(expired.cancel_reason, Some(CancelReason::Expire));
        assert_eq!(fx.memory.promotion_uses("SUMMER10").await, 0);
        assert_eq!(fx.notifier.kinds(), vec![EventKind::Expired]);

        let slots = fx
            .availability()
            .slots(fx.tenant_id, &fx.query(), DisplayMode::Any, later)
            .await
            .unwrap();
        assert!(slots.creneaux.iter().all(|c| c.disponible));
    }

    #[tokio::test]
    async fn requested_controller_must_be_free() {
        let fx = fixture();
        let mut request = fx.request(fx.at(10, 0));
        request.controller_id = Some(Uuid::new_v4());
        let err = fx.reservations().reserve(fx.tenant_id, &request, fx.now).await.unwrap_err();
        assert_matches!(err, AppError::SlotUnavailable);
    }

    #[tokio::test]
    async fn off_grid_start_is_unavailable() {
        let fx = fixture();
        let err = fx
            .reservations()
            .reserve(fx.tenant_id, &fx.request(fx.at(10, 10)), fx.now)
            .await
            .unwrap_err();
        assert_matches!(err, AppError::SlotUnavailable);
    }
}
