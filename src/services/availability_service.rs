// src/services/availability_service.rs

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::BookingStore,
    models::{
        policy::BookingPolicy,
        scheduling::{
            weekday_index, AvailabilityResponse, AvailableDatesResponse, CentreDay, Creneau,
            PlanningResponse, PlanningSlot,
        },
    },
    services::{
        policy_service::PolicyService,
        slot_model::{self, Interval},
    },
};

/// Intervalo máximo aceito por `dates-disponibles`.
const MAX_DATE_RANGE_DAYS: i64 = 92;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Um créneau por horário, disponível se algum controlador estiver livre.
    #[default]
    Any,
    /// Um créneau por controlador e horário.
    Controleur,
}

#[derive(Debug, Clone)]
pub struct SlotQuery {
    pub centre_id: Uuid,
    pub date: NaiveDate,
    pub service_type: String,
    pub vehicle_type: Option<String>,
    pub fuel_type: Option<String>,
}

/// Um horário candidato de um controlador.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotView {
    pub controller_id: Uuid,
    pub controller_name: String,
    pub start: i64,
    pub end: i64,
    pub disponible: bool,
    pub occupant: Option<Uuid>,
    pub free_lines: Vec<i16>,
}

/// O dia calculado, com o que a reserva precisa para ocupar um horário.
#[derive(Debug, Clone)]
pub struct DayPlan {
    pub day: CentreDay,
    pub duration: i64,
    pub granularity: i64,
    pub slots: Vec<SlotView>,
}

// --- Ocupação ---

#[derive(Debug, Default)]
struct Occupancy {
    busy: HashMap<String, Vec<(Interval, Uuid)>>,
    tainted: HashMap<String, Vec<Interval>>,
}

impl Occupancy {
    fn build(day: &CentreDay, date: NaiveDate, granularity: i64) -> Self {
        let mut occupancy = Occupancy::default();

        for claim in day.claims.iter().filter(|c| c.date == date) {
            let start = slot_model::minute_of(claim.start_time);
            occupancy
                .busy
                .entry(claim.resource_key.clone())
                .or_default()
                .push((Interval::new(start, start + granularity), claim.appointment_id));
        }

        let mut by_resource: HashMap<String, Vec<(Interval, Uuid)>> = HashMap::new();
        for appt in day
            .appointments
            .iter()
            .filter(|a| a.date == date && a.status.holds_slot())
        {
            let span = Interval::new(
                slot_model::minute_of(appt.start_time),
                slot_model::minute_of(appt.start_time) + appt.minutes(),
            );
            let mut keys = vec![slot_model::line_key(appt.centre_id, appt.line)];
            if let Some(controller_id) = appt.controller_id {
                keys.push(slot_model::controller_key(controller_id));
            }
            for key in keys {
                by_resource.entry(key).or_default().push((span, appt.id));
            }
        }

        for (key, mut spans) in by_resource {
            spans.sort_by_key(|(span, _)| span.start);
            for (i, (a, a_id)) in spans.iter().enumerate() {
                for (b, b_id) in spans.iter().skip(i + 1) {
                    if a_id != b_id && a.overlaps(b) {
                        tracing::error!(
                            target: "ctrdv::consistency",
                            alert = true,
                            centre_id = %day.centre.id,
                            %date,
                            resource = %key,
                            first = %a_id,
                            second = %b_id,
                            "Agendamentos ativos sobrepostos; o intervalo foi excluído da oferta"
                        );
                        let tainted = occupancy.tainted.entry(key.clone()).or_default();
                        tainted.push(*a);
                        tainted.push(*b);
                    }
                }
            }
            occupancy.busy.entry(key).or_default().extend(spans);
        }

        occupancy
    }

    fn occupant(&self, key: &str, span: &Interval) -> Option<Uuid> {
        self.busy
            .get(key)?
            .iter()
            .find(|(busy, _)| busy.overlaps(span))
            .map(|(_, id)| *id)
    }

    fn is_tainted(&self, key: &str, span: &Interval) -> bool {
        self.tainted
            .get(key)
            .is_some_and(|spans| spans.iter().any(|t| t.overlaps(span)))
    }

    fn is_free(&self, key: &str, span: &Interval) -> bool {
        self.occupant(key, span).is_none() && !self.is_tainted(key, span)
    }
}

/// Calcula os horários candidatos de cada controlador para `date`.
/// Função pura sobre o `CentreDay` já carregado.
pub fn build_day(
    day: &CentreDay,
    date: NaiveDate,
    service_type: &str,
    duration: i64,
    granularity: i64,
) -> Vec<SlotView> {
    let centre = &day.centre;
    let weekday = weekday_index(date);
    let opening: Vec<_> = day
        .opening_hours
        .iter()
        .filter(|h| h.weekday == weekday)
        .cloned()
        .collect();

    if !centre.active || !centre.certified_for(service_type) || opening.is_empty() {
        return Vec::new();
    }

    let mut centre_blocks = Vec::new();
    let mut controller_blocks: HashMap<Uuid, Vec<Interval>> = HashMap::new();
    let mut line_blocks: HashMap<i16, Vec<Interval>> = HashMap::new();
    for block in &day.blocks {
        let Some(span) = slot_model::block_interval(block, date) else {
            continue;
        };
        match (block.controller_id, block.line) {
            (Some(controller_id), _) => controller_blocks.entry(controller_id).or_default().push(span),
            (None, Some(line)) => line_blocks.entry(line).or_default().push(span),
            (None, None) => centre_blocks.push(span),
        }
    }
    let hits = |spans: Option<&Vec<Interval>>, span: &Interval| {
        spans.is_some_and(|spans| spans.iter().any(|b| b.overlaps(span)))
    };
    let occupancy = Occupancy::build(day, date, granularity);

    let mut slots = Vec::new();
    for controller in day
        .controllers
        .iter()
        .filter(|c| c.active && c.centre_id == centre.id && c.certified_for(service_type))
    {
        let windows: Vec<Interval> = day
            .plages
            .iter()
            .filter(|p| p.controller_id == controller.id && p.weekday == weekday)
            .flat_map(|p| slot_model::working_windows(&opening, p))
            .collect();
        let controller_key = slot_model::controller_key(controller.id);

        for start in slot_model::candidate_starts(&windows, duration, granularity) {
            let span = Interval::new(start, start + duration);
            let blocked = hits(Some(&centre_blocks), &span) || hits(controller_blocks.get(&controller.id), &span);
            let occupant = occupancy.occupant(&controller_key, &span);
            let tainted = occupancy.is_tainted(&controller_key, &span);

            let free_lines: Vec<i16> = if blocked {
                Vec::new()
            } else {
                (1..=centre.lines)
                    .filter(|line| {
                        !hits(line_blocks.get(line), &span)
                            && occupancy.is_free(&slot_model::line_key(centre.id, *line), &span)
                    })
                    .collect()
            };

            slots.push(SlotView {
                controller_id: controller.id,
                controller_name: controller.name.clone(),
                start,
                end: start + duration,
                disponible: !blocked && occupant.is_none() && !tainted && !free_lines.is_empty(),
                occupant,
                free_lines,
            });
        }
    }

    slots.sort_by(|a, b| (a.start, &a.controller_name).cmp(&(b.start, &b.controller_name)));
    slots
}

fn creneau(slot: &SlotView, with_controller: bool) -> Option<Creneau> {
    Some(Creneau {
        heure_debut: slot_model::time_of(slot.start)?,
        heure_fin: slot_model::time_of(slot.end)?,
        controleur_id: with_controller.then_some(slot.controller_id),
        controleur_nom: with_controller.then(|| slot.controller_name.clone()),
        disponible: slot.disponible,
    })
}

/// Agrupa por horário: disponível se algum controlador estiver livre.
pub fn merge_any(slots: &[SlotView]) -> Vec<Creneau> {
    let mut merged: BTreeMap<i64, SlotView> = BTreeMap::new();
    for slot in slots {
        merged
            .entry(slot.start)
            .and_modify(|m| m.disponible |= slot.disponible)
            .or_insert_with(|| slot.clone());
    }
    merged.values().filter_map(|s| creneau(s, false)).collect()
}

pub fn per_controller(slots: &[SlotView]) -> Vec<Creneau> {
    slots.iter().filter_map(|s| creneau(s, true)).collect()
}

#[derive(Clone)]
pub struct AvailabilityService {
    store: Arc<dyn BookingStore>,
    policies: PolicyService,
}

impl AvailabilityService {
    pub fn new(store: Arc<dyn BookingStore>, policies: PolicyService) -> Self {
        Self { store, policies }
    }

    /// Carrega e calcula o dia. `Ok(None)` quando não há nada a oferecer
    /// (fora da janela de reserva, sem regra de duração).
    /// `exclude` ignora a ocupação de um agendamento (ele mesmo, numa replanificação).
    pub async fn day_plan(
        &self,
        tenant_id: Uuid,
        query: &SlotQuery,
        policy: &BookingPolicy,
        now: DateTime<Utc>,
        enforce_window: bool,
        exclude: Option<Uuid>,
    ) -> Result<Option<DayPlan>, AppError> {
        let mut day = self
            .store
            .centre_day(tenant_id, query.centre_id, query.date)
            .await?
            .ok_or(AppError::CentreNotFound)?;

        if enforce_window && !policy.accepts_date(day.centre.local_today(now), query.date) {
            return Ok(None);
        }

        let rules = self.store.duration_rules(tenant_id, &query.service_type).await?;
        let duration = match &query.vehicle_type {
            Some(vehicle) => {
                slot_model::resolve_duration(&rules, &query.service_type, vehicle, query.fuel_type.as_deref())
            }
            None => slot_model::shortest_duration(&rules, &query.service_type),
        };
        let Some(duration) = duration else {
            tracing::warn!(
                %tenant_id,
                service_type = %query.service_type,
                vehicle_type = ?query.vehicle_type,
                "Nenhuma regra de duração para o serviço; nenhum horário oferecido"
            );
            return Ok(None);
        };

        if let Some(excluded) = exclude {
            day.claims.retain(|c| c.appointment_id != excluded);
            day.appointments.retain(|a| a.id != excluded);
        }

        let slots = build_day(&day, query.date, &query.service_type, duration, policy.granularity_minutes);
        Ok(Some(DayPlan {
            day,
            duration,
            granularity: policy.granularity_minutes,
            slots,
        }))
    }

    pub async fn slots(
        &self,
        tenant_id: Uuid,
        query: &SlotQuery,
        mode: DisplayMode,
        now: DateTime<Utc>,
    ) -> Result<AvailabilityResponse, AppError> {
        let policy = self.policies.resolve(tenant_id).await?;
        let plan = self.day_plan(tenant_id, query, &policy, now, true, None).await?;
        let creneaux = match (plan, mode) {
            (None, _) => Vec::new(),
            (Some(plan), DisplayMode::Any) => merge_any(&plan.slots),
            (Some(plan), DisplayMode::Controleur) => per_controller(&plan.slots),
        };
        Ok(AvailabilityResponse {
            date: query.date,
            creneaux,
        })
    }

    /// Datas com ao menos um horário livre, limitadas à janela de reserva.
    pub async fn available_dates(
        &self,
        tenant_id: Uuid,
        centre_id: Uuid,
        service_type: &str,
        vehicle_type: Option<&str>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Result<AvailableDatesResponse, AppError> {
        let policy = self.policies.resolve(tenant_id).await?;
        let first = match from {
            Some(date) => date,
            // "Hoje" do centro: perto da meia-noite difere da data UTC.
            None => self
                .store
                .centre_day(tenant_id, centre_id, now.date_naive())
                .await?
                .ok_or(AppError::CentreNotFound)?
                .centre
                .local_today(now),
        };
        let last = to.unwrap_or(first + Duration::days(policy.horizon_days));
        if last < first {
            return Err(AppError::BadRequest("date_fin < date_debut".into()));
        }
        if (last - first).num_days() > MAX_DATE_RANGE_DAYS {
            return Err(AppError::BadRequest(format!(
                "intervalo maior que {} dias",
                MAX_DATE_RANGE_DAYS
            )));
        }

        let mut dates = Vec::new();
        let mut date = first;
        while date <= last {
            let query = SlotQuery {
                centre_id,
                date,
                service_type: service_type.to_string(),
                vehicle_type: vehicle_type.map(String::from),
                fuel_type: None,
            };
            if let Some(plan) = self.day_plan(tenant_id, &query, &policy, now, true, None).await? {
                if plan.slots.iter().any(|s| s.disponible) {
                    dates.push(date);
                }
            }
            date += Duration::days(1);
        }
        Ok(AvailableDatesResponse { dates })
    }

    /// Grade por controlador para o console do centro, com o agendamento que ocupa cada horário.
    pub async fn planning(
        &self,
        tenant_id: Uuid,
        query: &SlotQuery,
        now: DateTime<Utc>,
    ) -> Result<PlanningResponse, AppError> {
        let policy = self.policies.resolve(tenant_id).await?;
        let plan = self.day_plan(tenant_id, query, &policy, now, false, None).await?;
        let creneaux = plan
            .map(|plan| {
                plan.slots
                    .iter()
                    .filter_map(|s| {
                        Some(PlanningSlot {
                            heure_debut: slot_model::time_of(s.start)?,
                            heure_fin: slot_model::time_of(s.end)?,
                            controleur_id: s.controller_id,
                            controleur_nom: s.controller_name.clone(),
                            disponible: s.disponible,
                            rdv_id: s.occupant,
                            lignes_libres: s.free_lines.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(PlanningResponse {
            date: query.date,
            creneaux,
        })
    }
}
