// src/models/policy.rs

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Política de agendamento efetiva para um tenant (padrões globais + sobrescritas do tenant).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingPolicy {
    pub cancel_min_lead: Duration,
    pub reschedule_min_lead: Duration,
    pub reservation_ttl: Duration,
    pub min_lead_days: i64,
    pub horizon_days: i64,
    pub granularity_minutes: i64,
    pub payment_exempt: bool,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            cancel_min_lead: Duration::hours(24),
            reschedule_min_lead: Duration::hours(48),
            reservation_ttl: Duration::minutes(15),
            min_lead_days: 1,
            horizon_days: 60,
            granularity_minutes: 30,
            payment_exempt: false,
        }
    }
}

impl BookingPolicy {
    /// Aplica a linha `tenant_policies` (colunas nulas mantêm o padrão).
    pub fn with_overrides(&self, row: Option<&TenantPolicy>) -> Self {
        let Some(row) = row else {
            return self.clone();
        };
        Self {
            cancel_min_lead: row
                .cancel_min_hours
                .map(|h| Duration::hours(h as i64))
                .unwrap_or(self.cancel_min_lead),
            reschedule_min_lead: row
                .reschedule_min_hours
                .map(|h| Duration::hours(h as i64))
                .unwrap_or(self.reschedule_min_lead),
            reservation_ttl: row
                .reservation_ttl_minutes
                .map(|m| Duration::minutes(m as i64))
                .unwrap_or(self.reservation_ttl),
            min_lead_days: row.min_lead_days.map(i64::from).unwrap_or(self.min_lead_days),
            horizon_days: row.horizon_days.map(i64::from).unwrap_or(self.horizon_days),
            granularity_minutes: row
                .slot_granularity_minutes
                .filter(|g| *g > 0)
                .map(i64::from)
                .unwrap_or(self.granularity_minutes),
            payment_exempt: row.payment_exempt.unwrap_or(self.payment_exempt),
        }
    }

    /// Janela de datas reservável a partir de `today` (data local do centro), inclusiva.
    pub fn booking_window(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        (
            today + Duration::days(self.min_lead_days),
            today + Duration::days(self.horizon_days),
        )
    }

    pub fn accepts_date(&self, today: NaiveDate, date: NaiveDate) -> bool {
        let (first, last) = self.booking_window(today);
        date >= first && date <= last
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct TenantPolicy {
    pub tenant_id: Uuid,
    pub cancel_min_hours: Option<i32>,
    pub reschedule_min_hours: Option<i32>,
    pub reservation_ttl_minutes: Option<i32>,
    pub min_lead_days: Option<i32>,
    pub horizon_days: Option<i32>,
    pub slot_granularity_minutes: Option<i32>,
    pub payment_exempt: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_columns_keep_defaults() {
        let row = TenantPolicy {
            tenant_id: Uuid::new_v4(),
            cancel_min_hours: Some(12),
            slot_granularity_minutes: Some(0),
            ..Default::default()
        };
        let policy = BookingPolicy::default().with_overrides(Some(&row));
        assert_eq!(policy.cancel_min_lead, Duration::hours(12));
        assert_eq!(policy.reschedule_min_lead, Duration::hours(48));
        assert_eq!(policy.granularity_minutes, 30);
    }

    #[test]
    fn window_starts_tomorrow_and_is_inclusive() {
        let policy = BookingPolicy::default();
        let today = NaiveDate::from_ymd_opt(2030, 1, 7).unwrap();
        assert!(!policy.accepts_date(today, today));
        assert!(policy.accepts_date(today, today + Duration::days(1)));
        assert!(policy.accepts_date(today, today + Duration::days(60)));
        assert!(!policy.accepts_date(today, today + Duration::days(61)));
    }
}
