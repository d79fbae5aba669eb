// src/services/slot_model.rs
//
// Aritmética de horários em minutos desde a meia-noite (hora local do centro).
// Os intervalos são semiabertos: [start, end).

use chrono::{Duration, NaiveDate, NaiveTime, Timelike};
use uuid::Uuid;

use crate::models::scheduling::{Block, DurationRule, OpeningHours, Plage, SlotClaim};

pub const MINUTES_PER_DAY: i64 = 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: i64,
    pub end: i64,
}

impl Interval {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        let i = Interval::new(self.start.max(other.start), self.end.min(other.end));
        (!i.is_empty()).then_some(i)
    }

    /// Remove `hole` deste intervalo; devolve 0, 1 ou 2 pedaços.
    pub fn subtract(&self, hole: &Interval) -> Vec<Interval> {
        if !self.overlaps(hole) {
            return vec![*self];
        }
        [
            Interval::new(self.start, hole.start),
            Interval::new(hole.end, self.end),
        ]
        .into_iter()
        .filter(|i| !i.is_empty())
        .collect()
    }
}

pub fn minute_of(time: NaiveTime) -> i64 {
    (time.hour() * 60 + time.minute()) as i64
}

/// Inverso de `minute_of`. `None` fora do dia (ex.: 24:00).
pub fn time_of(minute: i64) -> Option<NaiveTime> {
    if !(0..MINUTES_PER_DAY).contains(&minute) {
        return None;
    }
    NaiveTime::from_hms_opt((minute / 60) as u32, (minute % 60) as u32, 0)
}

fn optional_gap(start: Option<NaiveTime>, end: Option<NaiveTime>) -> Option<Interval> {
    match (start, end) {
        (Some(s), Some(e)) => {
            let gap = Interval::new(minute_of(s), minute_of(e));
            (!gap.is_empty()).then_some(gap)
        }
        _ => None,
    }
}

fn minus(windows: Vec<Interval>, hole: Option<Interval>) -> Vec<Interval> {
    match hole {
        Some(hole) => windows.iter().flat_map(|w| w.subtract(&hole)).collect(),
        None => windows,
    }
}

/// Janelas em que o controlador pode trabalhar: plage ∩ abertura do centro,
/// menos a pausa do controlador e o intervalo do centro.
pub fn working_windows(opening: &[OpeningHours], plage: &Plage) -> Vec<Interval> {
    let own = minus(
        vec![Interval::new(minute_of(plage.starts_at), minute_of(plage.ends_at))],
        optional_gap(plage.pause_start, plage.pause_end),
    );

    let mut windows = Vec::new();
    for hours in opening {
        let open = minus(
            vec![Interval::new(minute_of(hours.opens_at), minute_of(hours.closes_at))],
            optional_gap(hours.break_start, hours.break_end),
        );
        for a in &own {
            for b in &open {
                if let Some(i) = a.intersect(b) {
                    windows.push(i);
                }
            }
        }
    }
    windows.sort_by_key(|w| w.start);
    windows
}

/// Inícios alinhados à grade (múltiplos de `granularity` desde a meia-noite)
/// cujo serviço inteiro cabe na janela.
pub fn candidate_starts(windows: &[Interval], duration: i64, granularity: i64) -> Vec<i64> {
    let mut starts = Vec::new();
    if duration <= 0 || granularity <= 0 {
        return starts;
    }
    for w in windows {
        let mut s = (w.start + granularity - 1) / granularity * granularity;
        while s + duration <= w.end {
            starts.push(s);
            s += granularity;
        }
    }
    starts.sort_unstable();
    starts.dedup();
    starts
}

/// Buckets da grade ocupados por um serviço de `duration` minutos começando em `start`.
pub fn buckets(start: i64, duration: i64, granularity: i64) -> Vec<i64> {
    let first = start.div_euclid(granularity) * granularity;
    (0..)
        .map(|k| first + k * granularity)
        .take_while(|b| *b < start + duration)
        .collect()
}

/// Parte de um bloqueio que cai em `date`, em minutos.
pub fn block_interval(block: &Block, date: NaiveDate) -> Option<Interval> {
    let day_start = date.and_hms_opt(0, 0, 0)?;
    let from = (block.starts_at - day_start).num_minutes();
    let to = (block.ends_at - day_start).num_minutes();
    Interval::new(from, to).intersect(&Interval::new(0, MINUTES_PER_DAY))
}

pub fn controller_key(controller_id: Uuid) -> String {
    format!("ctrl:{}", controller_id)
}

pub fn line_key(centre_id: Uuid, line: i16) -> String {
    format!("line:{}:{}", centre_id, line)
}

/// Linhas da tabela `slot_claims` para um recurso.
pub fn claims_for(
    resource_key: &str,
    centre_id: Uuid,
    appointment_id: Uuid,
    date: NaiveDate,
    start: i64,
    duration: i64,
    granularity: i64,
) -> Vec<SlotClaim> {
    buckets(start, duration, granularity)
        .into_iter()
        .filter_map(|b| time_of(b))
        .map(|start_time| SlotClaim {
            resource_key: resource_key.to_string(),
            centre_id,
            date,
            start_time,
            appointment_id,
        })
        .collect()
}

/// Duração do serviço. A regra específica do combustível vence a genérica.
pub fn resolve_duration(
    rules: &[DurationRule],
    service_type: &str,
    vehicle_type: &str,
    fuel_type: Option<&str>,
) -> Option<i64> {
    let matching = || {
        rules
            .iter()
            .filter(|r| r.service_type == service_type && r.vehicle_type == vehicle_type && r.minutes > 0)
    };
    let specific = fuel_type.and_then(|fuel| {
        matching().find(|r| r.fuel_type.as_deref().is_some_and(|f| f.eq_ignore_ascii_case(fuel)))
    });
    specific
        .or_else(|| matching().find(|r| r.fuel_type.is_none()))
        .map(|r| r.minutes as i64)
}

/// Menor duração conhecida para o serviço (usada quando o tipo de veículo não é informado).
pub fn shortest_duration(rules: &[DurationRule], service_type: &str) -> Option<i64> {
    rules
        .iter()
        .filter(|r| r.service_type == service_type && r.minutes > 0)
        .map(|r| r.minutes as i64)
        .min()
}

pub fn end_time(start: NaiveTime, duration: i64) -> NaiveTime {
    start + Duration::minutes(duration)
}
