// src/db/memory_store.rs
//
// Store em memória: usado nos testes e quando `DATABASE_URL` não está definida.
// Cada operação faz verificação e escrita sob o mesmo lock, o que dá a mesma
// atomicidade da transação no Postgres.

use std::{collections::HashMap, path::Path};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::store::{BookingStore, ClaimOutcome, StatusChange},
    models::{
        appointment::Appointment,
        payment::Payment,
        policy::TenantPolicy,
        pricing::{Promotion, Tariff},
        scheduling::{Block, Centre, CentreDay, Controller, DurationRule, OpeningHours, Plage, SlotClaim},
    },
};

/// Dados de referência carregados de um arquivo JSON (`SEED_FILE`).
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSeed {
    pub centres: Vec<Centre>,
    pub opening_hours: Vec<OpeningHours>,
    pub controllers: Vec<Controller>,
    pub plages: Vec<Plage>,
    pub blocks: Vec<Block>,
    pub duration_rules: Vec<DurationRule>,
    pub tariffs: Vec<Tariff>,
    pub promotions: Vec<Promotion>,
    pub tenant_policies: Vec<TenantPolicy>,
}

impl StoreSeed {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Falha ao ler o seed {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Seed inválido em {}", path.display()))
    }
}

type ClaimKey = (String, NaiveDate, NaiveTime);

fn key_of(claim: &SlotClaim) -> ClaimKey {
    (claim.resource_key.clone(), claim.date, claim.start_time)
}

#[derive(Default)]
struct Tables {
    seed: StoreSeed,
    appointments: HashMap<Uuid, Appointment>,
    claims: HashMap<ClaimKey, SlotClaim>,
    payments: Vec<Payment>,
}

impl Tables {
    fn promotion_available(&self, promotion_id: Option<Uuid>) -> bool {
        let Some(id) = promotion_id else {
            return true;
        };
        self.seed
            .promotions
            .iter()
            .find(|p| p.id == id)
            .is_some_and(|p| p.max_uses.is_none_or(|max| p.used_count < max))
    }

    fn adjust_promotion(&mut self, promotion_id: Option<Uuid>, delta: i32) {
        if let Some(promo) = promotion_id.and_then(|id| self.seed.promotions.iter_mut().find(|p| p.id == id)) {
            promo.used_count = (promo.used_count + delta).max(0);
        }
    }

    fn release_claims(&mut self, appointment_id: Uuid) {
        self.claims.retain(|_, claim| claim.appointment_id != appointment_id);
    }

    // Mesma semântica do ON CONFLICT ... DO UPDATE: o id da linha original é mantido.
    fn upsert_payment(&mut self, payment: &Payment) {
        match self.payments.iter_mut().find(|p| {
            p.appointment_id == payment.appointment_id
                && p.provider_transaction_id == payment.provider_transaction_id
        }) {
            Some(existing) => {
                existing.status = payment.status;
                existing.amount = payment.amount;
                existing.updated_at = payment.updated_at;
            }
            None => self.payments.push(payment.clone()),
        }
    }

    fn commit_transition(&mut self, change: &StatusChange, current: &Appointment) -> Appointment {
        let next = change.apply_to(current);
        if change.release_slot {
            self.release_claims(current.id);
        }
        if change.refund_promotion {
            self.adjust_promotion(current.promotion_id, -1);
        }
        if let Some(payment) = &change.payment {
            self.upsert_payment(payment);
        }
        self.appointments.insert(next.id, next.clone());
        next
    }
}

pub struct MemoryBookingStore {
    tables: Mutex<Tables>,
}

impl MemoryBookingStore {
    pub fn new(seed: StoreSeed) -> Self {
        Self {
            tables: Mutex::new(Tables {
                seed,
                ..Default::default()
            }),
        }
    }
}

#[cfg(test)]
impl MemoryBookingStore {
    pub async fn claims(&self) -> Vec<SlotClaim> {
        self.tables.lock().await.claims.values().cloned().collect()
    }

    pub async fn claims_of(&self, appointment_id: Uuid) -> Vec<SlotClaim> {
        let mut claims: Vec<SlotClaim> = self
            .claims()
            .await
            .into_iter()
            .filter(|c| c.appointment_id == appointment_id)
            .collect();
        claims.sort_by(|a, b| (&a.resource_key, a.start_time).cmp(&(&b.resource_key, b.start_time)));
        claims
    }

    pub async fn payments_of(&self, appointment_id: Uuid) -> Vec<Payment> {
        let tables = self.tables.lock().await;
        tables
            .payments
            .iter()
            .filter(|p| p.appointment_id == appointment_id)
            .cloned()
            .collect()
    }

    pub async fn promotion_uses(&self, code: &str) -> i32 {
        let tables = self.tables.lock().await;
        tables
            .seed
            .promotions
            .iter()
            .find(|p| p.code.eq_ignore_ascii_case(code))
            .map(|p| p.used_count)
            .unwrap_or_default()
    }

    pub async fn appointment_by_id(&self, id: Uuid) -> Option<Appointment> {
        self.tables.lock().await.appointments.get(&id).cloned()
    }
}

#[async_trait]
impl BookingStore for MemoryBookingStore {
    async fn tenant_policy(&self, tenant_id: Uuid) -> Result<Option<TenantPolicy>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .seed
            .tenant_policies
            .iter()
            .find(|p| p.tenant_id == tenant_id)
            .cloned())
    }

    async fn centre_day(
        &self,
        tenant_id: Uuid,
        centre_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<CentreDay>, AppError> {
        let tables = self.tables.lock().await;
        let Some(centre) = tables
            .seed
            .centres
            .iter()
            .find(|c| c.id == centre_id && c.tenant_id == tenant_id)
            .cloned()
        else {
            return Ok(None);
        };

        let controllers: Vec<Controller> = tables
            .seed
            .controllers
            .iter()
            .filter(|c| c.centre_id == centre_id)
            .cloned()
            .collect();
        let plages = tables
            .seed
            .plages
            .iter()
            .filter(|p| controllers.iter().any(|c| c.id == p.controller_id))
            .cloned()
            .collect();

        let day_start = date.and_time(NaiveTime::MIN);
        let day_end = day_start + Duration::days(1);
        let blocks = tables
            .seed
            .blocks
            .iter()
            .filter(|b| b.centre_id == centre_id && b.starts_at < day_end && b.ends_at > day_start)
            .cloned()
            .collect();

        let claims = tables
            .claims
            .values()
            .filter(|c| c.centre_id == centre_id && c.date == date)
            .cloned()
            .collect();
        let appointments = tables
            .appointments
            .values()
            .filter(|a| {
                a.tenant_id == tenant_id && a.centre_id == centre_id && a.date == date && a.status.holds_slot()
            })
            .cloned()
            .collect();

        Ok(Some(CentreDay {
            opening_hours: tables
                .seed
                .opening_hours
                .iter()
                .filter(|h| h.centre_id == centre_id)
                .cloned()
                .collect(),
            centre,
            controllers,
            plages,
            blocks,
            claims,
            appointments,
        }))
    }

    async fn duration_rules(&self, tenant_id: Uuid, service_type: &str) -> Result<Vec<DurationRule>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .seed
            .duration_rules
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.service_type == service_type)
            .cloned()
            .collect())
    }

    async fn tariffs(
        &self,
        tenant_id: Uuid,
        service_type: &str,
        vehicle_type: &str,
    ) -> Result<Vec<Tariff>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .seed
            .tariffs
            .iter()
            .filter(|t| t.tenant_id == tenant_id && t.service_type == service_type && t.vehicle_type == vehicle_type)
            .cloned()
            .collect())
    }

    async fn promotion_by_code(&self, tenant_id: Uuid, code: &str) -> Result<Option<Promotion>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .seed
            .promotions
            .iter()
            .find(|p| p.tenant_id == tenant_id && p.code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn appointment(&self, tenant_id: Option<Uuid>, id: Uuid) -> Result<Option<Appointment>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .appointments
            .get(&id)
            .filter(|a| tenant_id.is_none_or(|t| a.tenant_id == t))
            .cloned())
    }

    async fn expired_reservations(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Appointment>, AppError> {
        let tables = self.tables.lock().await;
        let mut expired: Vec<Appointment> = tables
            .appointments
            .values()
            .filter(|a| a.status.is_provisional() && a.expires_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        expired.sort_by_key(|a| a.expires_at);
        expired.truncate(limit.max(0) as usize);
        Ok(expired)
    }

    async fn payments_for(&self, appointment_id: Uuid) -> Result<Vec<Payment>, AppError> {
        let tables = self.tables.lock().await;
        let mut payments: Vec<Payment> = tables
            .payments
            .iter()
            .filter(|p| p.appointment_id == appointment_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn record_payment(&self, payment: &Payment) -> Result<(), AppError> {
        self.tables.lock().await.upsert_payment(payment);
        Ok(())
    }

    async fn insert_reservation(&self, appointment: &Appointment, claims: &[SlotClaim]) -> Result<ClaimOutcome, AppError> {
        let mut tables = self.tables.lock().await;
        if claims.iter().any(|c| tables.claims.contains_key(&key_of(c))) {
            return Ok(ClaimOutcome::SlotTaken);
        }
        if !tables.promotion_available(appointment.promotion_id) {
            return Ok(ClaimOutcome::PromotionExhausted);
        }

        tables.adjust_promotion(appointment.promotion_id, 1);
        for claim in claims {
            tables.claims.insert(key_of(claim), claim.clone());
        }
        tables.appointments.insert(appointment.id, appointment.clone());
        Ok(ClaimOutcome::Claimed(appointment.clone()))
    }

    async fn apply_transition(&self, change: &StatusChange) -> Result<Option<Appointment>, AppError> {
        let mut tables = self.tables.lock().await;
        let Some(current) = tables.appointments.get(&change.appointment_id).cloned() else {
            return Ok(None);
        };
        if !change.matches(&current) {
            return Ok(None);
        }
        Ok(Some(tables.commit_transition(change, &current)))
    }

    async fn reschedule(
        &self,
        change: &StatusChange,
        replacement: &Appointment,
        claims: &[SlotClaim],
    ) -> Result<ClaimOutcome, AppError> {
        let mut tables = self.tables.lock().await;
        let Some(current) = tables.appointments.get(&change.appointment_id).cloned() else {
            return Ok(ClaimOutcome::StaleStatus);
        };
        if !change.matches(&current) {
            return Ok(ClaimOutcome::StaleStatus);
        }
        // Os buckets do agendamento antigo são liberados na mesma operação.
        let taken = claims.iter().any(|c| {
            tables
                .claims
                .get(&key_of(c))
                .is_some_and(|held| held.appointment_id != current.id)
        });
        if taken {
            return Ok(ClaimOutcome::SlotTaken);
        }

        tables.commit_transition(change, &current);
        for claim in claims {
            tables.claims.insert(key_of(claim), claim.clone());
        }
        tables.appointments.insert(replacement.id, replacement.clone());
        Ok(ClaimOutcome::Claimed(replacement.clone()))
    }
}
