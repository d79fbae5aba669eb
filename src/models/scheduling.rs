// src/models/scheduling.rs

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::appointment::Appointment;

// --- Formato "HH:MM" usado na API ---

pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    // Aceita "10:00" e "10:00:00".
    pub fn parse(raw: &str) -> Result<NaiveTime, chrono::ParseError> {
        NaiveTime::parse_from_str(raw, FORMAT).or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(time: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error> {
            match time {
                Some(t) => super::serialize(t, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveTime>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| super::parse(&raw).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

/// 0 = segunda-feira ... 6 = domingo, igual à coluna `weekday` das tabelas de horário.
pub fn weekday_index(date: NaiveDate) -> i16 {
    date.weekday().num_days_from_monday() as i16
}

// --- Centro e horários ---

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Centre {
    pub id: Uuid,
    #[schema(ignore)]
    pub tenant_id: Uuid,
    #[schema(example = "Centre Contrôle Technique Lyon 7")]
    pub name: String,
    pub address: Option<String>,
    /// Número de linhas de inspeção (capacidade física).
    #[schema(example = 2)]
    pub lines: i16,
    /// Tipos de controle para os quais o centro tem agrément.
    #[schema(example = json!(["CTP", "CVP"]))]
    pub certifications: Vec<String>,
    #[serde(default)]
    #[schema(example = 60)]
    pub utc_offset_minutes: i32,
    pub active: bool,
}

impl Centre {
    pub fn certified_for(&self, service_type: &str) -> bool {
        self.certifications.iter().any(|c| c == service_type)
    }

    /// Data local do centro no instante `now`.
    pub fn local_today(&self, now: DateTime<Utc>) -> NaiveDate {
        (now + Duration::minutes(self.utc_offset_minutes as i64)).date_naive()
    }

    /// Converte data/hora locais do centro em instante UTC.
    pub fn instant_of(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let local = date.and_time(time);
        Utc.from_utc_datetime(&(local - Duration::minutes(self.utc_offset_minutes as i64)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct OpeningHours {
    pub centre_id: Uuid,
    pub weekday: i16,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "08:00")]
    pub opens_at: NaiveTime,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "18:00")]
    pub closes_at: NaiveTime,
    #[serde(default, with = "hhmm::option")]
    #[schema(value_type = Option<String>, example = "12:00")]
    pub break_start: Option<NaiveTime>,
    #[serde(default, with = "hhmm::option")]
    #[schema(value_type = Option<String>, example = "13:30")]
    pub break_end: Option<NaiveTime>,
}

// --- Controladores ---

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Controller {
    pub id: Uuid,
    pub centre_id: Uuid,
    #[schema(example = "Julien Martin")]
    pub name: String,
    pub certifications: Vec<String>,
    pub active: bool,
}

impl Controller {
    pub fn certified_for(&self, service_type: &str) -> bool {
        self.certifications.iter().any(|c| c == service_type)
    }
}

/// Plage de trabalho de um controlador num dia da semana, com pausa opcional.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Plage {
    pub controller_id: Uuid,
    pub weekday: i16,
    #[serde(with = "hhmm")]
    #[schema(value_type = String)]
    pub starts_at: NaiveTime,
    #[serde(with = "hhmm")]
    #[schema(value_type = String)]
    pub ends_at: NaiveTime,
    #[serde(default, with = "hhmm::option")]
    #[schema(value_type = Option<String>)]
    pub pause_start: Option<NaiveTime>,
    #[serde(default, with = "hhmm::option")]
    #[schema(value_type = Option<String>)]
    pub pause_end: Option<NaiveTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "block_kind", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockKind {
    Absence,
    Formation,
    Maintenance,
    Fermeture,
}

/// Período bloqueado. Sem `controller_id` nem `line` o bloqueio vale para o centro inteiro.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Block {
    pub id: Uuid,
    pub centre_id: Uuid,
    pub controller_id: Option<Uuid>,
    pub line: Option<i16>,
    /// Hora local do centro.
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub kind: BlockKind,
}

/// Duração da inspeção por (tipo de controle, tipo de veículo, combustível opcional).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct DurationRule {
    #[schema(ignore)]
    pub tenant_id: Uuid,
    #[schema(example = "CTP")]
    pub service_type: String,
    #[schema(example = "VP")]
    pub vehicle_type: String,
    pub fuel_type: Option<String>,
    #[schema(example = 30)]
    pub minutes: i32,
}

/// Linha da tabela `slot_claims`: um bucket de um recurso (controlador ou linha) ocupado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SlotClaim {
    pub resource_key: String,
    pub centre_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub appointment_id: Uuid,
}

/// Tudo o que o cálculo de disponibilidade precisa ler para um centro e uma data.
#[derive(Debug, Clone)]
pub struct CentreDay {
    pub centre: Centre,
    pub opening_hours: Vec<OpeningHours>,
    pub controllers: Vec<Controller>,
    pub plages: Vec<Plage>,
    pub blocks: Vec<Block>,
    pub claims: Vec<SlotClaim>,
    /// Agendamentos do dia que ainda ocupam horário.
    pub appointments: Vec<Appointment>,
}

// --- Respostas da API ---

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Creneau {
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "10:00")]
    pub heure_debut: NaiveTime,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "10:30")]
    pub heure_fin: NaiveTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controleur_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controleur_nom: Option<String>,
    pub disponible: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AvailabilityResponse {
    pub date: NaiveDate,
    pub creneaux: Vec<Creneau>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AvailableDatesResponse {
    pub dates: Vec<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlanningSlot {
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "10:00")]
    pub heure_debut: NaiveTime,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "10:30")]
    pub heure_fin: NaiveTime,
    pub controleur_id: Uuid,
    pub controleur_nom: String,
    pub disponible: bool,
    /// Agendamento que ocupa o horário, se houver.
    pub rdv_id: Option<Uuid>,
    pub lignes_libres: Vec<i16>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PlanningResponse {
    pub date: NaiveDate,
    pub creneaux: Vec<PlanningSlot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn centre(offset: i32) -> Centre {
        Centre {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "Test".into(),
            address: None,
            lines: 1,
            certifications: vec!["CTP".into()],
            utc_offset_minutes: offset,
            active: true,
        }
    }

    #[test]
    fn local_instant_respects_offset() {
        let c = centre(120);
        let date = NaiveDate::from_ymd_opt(2030, 6, 4).unwrap();
        let at = c.instant_of(date, NaiveTime::from_hms_opt(10, 0, 0).unwrap());
        assert_eq!(at.to_rfc3339(), "2030-06-04T08:00:00+00:00");
    }

    #[test]
    fn local_today_rolls_over_midnight() {
        let c = centre(60);
        let now = "2030-06-04T23:30:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(c.local_today(now), NaiveDate::from_ymd_opt(2030, 6, 5).unwrap());
    }

    #[test]
    fn hhmm_accepts_both_forms() {
        assert_eq!(hhmm::parse("08:30").unwrap(), NaiveTime::from_hms_opt(8, 30, 0).unwrap());
        assert_eq!(hhmm::parse("08:30:00").unwrap(), NaiveTime::from_hms_opt(8, 30, 0).unwrap());
        assert!(hhmm::parse("8h30").is_err());
    }
}
