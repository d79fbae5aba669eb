// src/db/pg_store.rs

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use sqlx::{Executor, PgPool, Postgres};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::store::{BookingStore, ClaimOutcome, StatusChange},
    models::{
        appointment::{Appointment, AppointmentStatus},
        payment::Payment,
        policy::TenantPolicy,
        pricing::{Promotion, Tariff},
        scheduling::{Block, Centre, CentreDay, Controller, DurationRule, OpeningHours, Plage, SlotClaim},
    },
};

const RELEASING: [AppointmentStatus; 3] = [
    AppointmentStatus::Annule,
    AppointmentStatus::Absent,
    AppointmentStatus::Reporte,
];

fn status_names(statuses: &[AppointmentStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[derive(Clone)]
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// =========================================================================
//  ESCRITAS (sempre dentro de uma transação aberta pelo chamador)
// =========================================================================

async fn insert_appointment<'e, E>(executor: E, a: &Appointment) -> Result<(), AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO appointments (
            id, tenant_id, centre_id, controller_id, line, reference,
            date, start_time, end_time, starts_at,
            service_type, vehicle_type, fuel_type, client, vehicle,
            status, source, base_price, discount, amount_ht, amount_tva, amount_ttc,
            promo_code, promotion_id, payment_status,
            checked_in_at, started_at, completed_at, result, cancel_reason,
            expires_at, rescheduled_from, rescheduled_to, created_at, updated_at
        )
        VALUES (
            $1, $2, $3, $4, $5, $6,
            $7, $8, $9, $10,
            $11, $12, $13, $14, $15,
            $16, $17, $18, $19, $20, $21, $22,
            $23, $24, $25,
            $26, $27, $28, $29, $30,
            $31, $32, $33, $34, $35
        )
        "#,
    )
    .bind(a.id)
    .bind(a.tenant_id)
    .bind(a.centre_id)
    .bind(a.controller_id)
    .bind(a.line)
    .bind(&a.reference)
    .bind(a.date)
    .bind(a.start_time)
    .bind(a.end_time)
    .bind(a.starts_at)
    .bind(&a.service_type)
    .bind(&a.vehicle_type)
    .bind(&a.fuel_type)
    .bind(&a.client)
    .bind(&a.vehicle)
    .bind(a.status)
    .bind(a.source)
    .bind(a.base_price)
    .bind(a.discount)
    .bind(a.amount_ht)
    .bind(a.amount_tva)
    .bind(a.amount_ttc)
    .bind(&a.promo_code)
    .bind(a.promotion_id)
    .bind(a.payment_status)
    .bind(a.checked_in_at)
    .bind(a.started_at)
    .bind(a.completed_at)
    .bind(&a.result)
    .bind(a.cancel_reason)
    .bind(a.expires_at)
    .bind(a.rescheduled_from)
    .bind(a.rescheduled_to)
    .bind(a.created_at)
    .bind(a.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

// Retorna quantos buckets foram de fato ocupados. Menos que `claims.len()` = corrida perdida.
async fn insert_claim<'e, E>(executor: E, claim: &SlotClaim) -> Result<u64, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO slot_claims (resource_key, centre_id, date, start_time, appointment_id)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (resource_key, date, start_time) DO NOTHING
        "#,
    )
    .bind(&claim.resource_key)
    .bind(claim.centre_id)
    .bind(claim.date)
    .bind(claim.start_time)
    .bind(claim.appointment_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

async fn release_claims<'e, E>(executor: E, appointment_id: Uuid) -> Result<(), AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("DELETE FROM slot_claims WHERE appointment_id = $1")
        .bind(appointment_id)
        .execute(executor)
        .await?;
    Ok(())
}

async fn upsert_payment<'e, E>(executor: E, p: &Payment) -> Result<(), AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO payments (id, appointment_id, provider, provider_transaction_id, amount, status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (appointment_id, provider_transaction_id)
        DO UPDATE SET status = EXCLUDED.status, amount = EXCLUDED.amount, updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(p.id)
    .bind(p.appointment_id)
    .bind(&p.provider)
    .bind(&p.provider_transaction_id)
    .bind(p.amount)
    .bind(p.status)
    .bind(p.created_at)
    .bind(p.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

/// UPDATE condicional: nenhuma linha volta se o status (ou o check-in) mudou no meio do caminho.
async fn update_status<'e, E>(executor: E, change: &StatusChange) -> Result<Option<Appointment>, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    let updated = sqlx::query_as::<_, Appointment>(
        r#"
        UPDATE appointments SET
            status = $2,
            payment_status = COALESCE($3, payment_status),
            cancel_reason = COALESCE($4, cancel_reason),
            checked_in_at = COALESCE($5, checked_in_at),
            started_at = COALESCE($6, started_at),
            completed_at = COALESCE($7, completed_at),
            result = COALESCE($8, result),
            expires_at = CASE WHEN $9 THEN NULL ELSE expires_at END,
            rescheduled_to = COALESCE($10, rescheduled_to),
            updated_at = $11
        WHERE id = $1
          AND status::text = ANY($12)
          AND ($13::boolean IS NULL OR (checked_in_at IS NOT NULL) = $13)
        RETURNING *
        "#,
    )
    .bind(change.appointment_id)
    .bind(change.to)
    .bind(change.payment_status)
    .bind(change.cancel_reason)
    .bind(change.checked_in_at)
    .bind(change.started_at)
    .bind(change.completed_at)
    .bind(&change.result)
    .bind(change.clear_expiry)
    .bind(change.rescheduled_to)
    .bind(change.at)
    .bind(status_names(&change.from))
    .bind(change.expect_checked_in)
    .fetch_optional(executor)
    .await?;
    Ok(updated)
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn tenant_policy(&self, tenant_id: Uuid) -> Result<Option<TenantPolicy>, AppError> {
        let policy = sqlx::query_as::<_, TenantPolicy>("SELECT * FROM tenant_policies WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(policy)
    }

    async fn centre_day(
        &self,
        tenant_id: Uuid,
        centre_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<CentreDay>, AppError> {
        let Some(centre) = sqlx::query_as::<_, Centre>("SELECT * FROM centres WHERE id = $1 AND tenant_id = $2")
            .bind(centre_id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let opening_hours = sqlx::query_as::<_, OpeningHours>(
            "SELECT centre_id, weekday, opens_at, closes_at, break_start, break_end FROM opening_hours WHERE centre_id = $1",
        )
        .bind(centre_id)
        .fetch_all(&self.pool)
        .await?;

        let controllers = sqlx::query_as::<_, Controller>("SELECT * FROM controllers WHERE centre_id = $1 ORDER BY name")
            .bind(centre_id)
            .fetch_all(&self.pool)
            .await?;

        let plages = sqlx::query_as::<_, Plage>(
            r#"
            SELECT p.controller_id, p.weekday, p.starts_at, p.ends_at, p.pause_start, p.pause_end
            FROM plages p
            JOIN controllers c ON c.id = p.controller_id
            WHERE c.centre_id = $1
            "#,
        )
        .bind(centre_id)
        .fetch_all(&self.pool)
        .await?;

        let day_start = date.and_time(NaiveTime::MIN);
        let blocks = sqlx::query_as::<_, Block>(
            "SELECT * FROM blocks WHERE centre_id = $1 AND starts_at < $3 AND ends_at > $2",
        )
        .bind(centre_id)
        .bind(day_start)
        .bind(day_start + Duration::days(1))
        .fetch_all(&self.pool)
        .await?;

        let claims = sqlx::query_as::<_, SlotClaim>("SELECT * FROM slot_claims WHERE centre_id = $1 AND date = $2")
            .bind(centre_id)
            .bind(date)
            .fetch_all(&self.pool)
            .await?;

        let appointments = sqlx::query_as::<_, Appointment>(
            r#"
            SELECT * FROM appointments
            WHERE tenant_id = $1 AND centre_id = $2 AND date = $3 AND status::text <> ALL($4)
            ORDER BY start_time
            "#,
        )
        .bind(tenant_id)
        .bind(centre_id)
        .bind(date)
        .bind(status_names(&RELEASING))
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(CentreDay {
            centre,
            opening_hours,
            controllers,
            plages,
            blocks,
            claims,
            appointments,
        }))
    }

    async fn duration_rules(&self, tenant_id: Uuid, service_type: &str) -> Result<Vec<DurationRule>, AppError> {
        let rules = sqlx::query_as::<_, DurationRule>(
            "SELECT * FROM duration_rules WHERE tenant_id = $1 AND service_type = $2",
        )
        .bind(tenant_id)
        .bind(service_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(rules)
    }

    async fn tariffs(
        &self,
        tenant_id: Uuid,
        service_type: &str,
        vehicle_type: &str,
    ) -> Result<Vec<Tariff>, AppError> {
        let tariffs = sqlx::query_as::<_, Tariff>(
            "SELECT * FROM tariffs WHERE tenant_id = $1 AND service_type = $2 AND vehicle_type = $3",
        )
        .bind(tenant_id)
        .bind(service_type)
        .bind(vehicle_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(tariffs)
    }

    async fn promotion_by_code(&self, tenant_id: Uuid, code: &str) -> Result<Option<Promotion>, AppError> {
        let promotion = sqlx::query_as::<_, Promotion>(
            "SELECT * FROM promotions WHERE tenant_id = $1 AND upper(code) = upper($2)",
        )
        .bind(tenant_id)
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(promotion)
    }

    async fn appointment(&self, tenant_id: Option<Uuid>, id: Uuid) -> Result<Option<Appointment>, AppError> {
        let appointment = sqlx::query_as::<_, Appointment>(
            "SELECT * FROM appointments WHERE id = $1 AND ($2::uuid IS NULL OR tenant_id = $2)",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(appointment)
    }

    async fn expired_reservations(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Appointment>, AppError> {
        let provisional = [AppointmentStatus::Cree, AppointmentStatus::EnAttentePaiement];
        let expired = sqlx::query_as::<_, Appointment>(
            r#"
            SELECT * FROM appointments
            WHERE status::text = ANY($1) AND expires_at IS NOT NULL AND expires_at <= $2
            ORDER BY expires_at
            LIMIT $3
            "#,
        )
        .bind(status_names(&provisional))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(expired)
    }

    async fn payments_for(&self, appointment_id: Uuid) -> Result<Vec<Payment>, AppError> {
        let payments = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE appointment_id = $1 ORDER BY created_at",
        )
        .bind(appointment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    async fn record_payment(&self, payment: &Payment) -> Result<(), AppError> {
        upsert_payment(&self.pool, payment).await
    }

    async fn insert_reservation(&self, appointment: &Appointment, claims: &[SlotClaim]) -> Result<ClaimOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        insert_appointment(&mut *tx, appointment).await?;
        let mut claimed = 0;
        for claim in claims {
            claimed += insert_claim(&mut *tx, claim).await?;
        }
        if claimed < claims.len() as u64 {
            tx.rollback().await?;
            return Ok(ClaimOutcome::SlotTaken);
        }

        if let Some(promotion_id) = appointment.promotion_id {
            // Incremento condicional: o limite de usos vale mesmo sob concorrência.
            let consumed = sqlx::query(
                r#"
                UPDATE promotions SET used_count = used_count + 1
                WHERE id = $1 AND (max_uses IS NULL OR used_count < max_uses)
                "#,
            )
            .bind(promotion_id)
            .execute(&mut *tx)
            .await?;
            if consumed.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(ClaimOutcome::PromotionExhausted);
            }
        }

        tx.commit().await?;
        Ok(ClaimOutcome::Claimed(appointment.clone()))
    }

    async fn apply_transition(&self, change: &StatusChange) -> Result<Option<Appointment>, AppError> {
        let mut tx = self.pool.begin().await?;

        let Some(updated) = update_status(&mut *tx, change).await? else {
            tx.rollback().await?;
            return Ok(None);
        };
        if change.release_slot {
            release_claims(&mut *tx, updated.id).await?;
        }
        if let Some(promotion_id) = updated.promotion_id.filter(|_| change.refund_promotion) {
            sqlx::query("UPDATE promotions SET used_count = GREATEST(used_count - 1, 0) WHERE id = $1")
                .bind(promotion_id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(payment) = &change.payment {
            upsert_payment(&mut *tx, payment).await?;
        }

        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn reschedule(
        &self,
        change: &StatusChange,
        replacement: &Appointment,
        claims: &[SlotClaim],
    ) -> Result<ClaimOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        // O antigo sai primeiro: seus buckets podem ser reaproveitados pelo novo.
        // `rescheduled_to` aponta para uma linha ainda inexistente; a FK é verificada no COMMIT.
        let Some(previous) = update_status(&mut *tx, change).await? else {
            tx.rollback().await?;
            return Ok(ClaimOutcome::StaleStatus);
        };
        release_claims(&mut *tx, previous.id).await?;

        insert_appointment(&mut *tx, replacement).await?;
        let mut claimed = 0;
        for claim in claims {
            claimed += insert_claim(&mut *tx, claim).await?;
        }
        if claimed < claims.len() as u64 {
            tx.rollback().await?;
            return Ok(ClaimOutcome::SlotTaken);
        }

        tx.commit().await?;
        Ok(ClaimOutcome::Claimed(replacement.clone()))
    }
}
