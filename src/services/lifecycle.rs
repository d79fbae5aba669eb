// src/services/lifecycle.rs
//
// Máquina de estados do agendamento. Funções puras: nada aqui lê relógio,
// banco ou configuração. `now` e os prazos chegam como parâmetros.

use chrono::{DateTime, Duration, Utc};

use crate::models::{
    appointment::{AppointmentStatus, InspectionResult},
    policy::BookingPolicy,
};

use AppointmentStatus::*;

/// Prazos mínimos antes do início do agendamento (por tenant).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatePolicy {
    pub cancel_min_lead: Duration,
    pub reschedule_min_lead: Duration,
}

impl From<&BookingPolicy> for GatePolicy {
    fn from(policy: &BookingPolicy) -> Self {
        Self {
            cancel_min_lead: policy.cancel_min_lead,
            reschedule_min_lead: policy.reschedule_min_lead,
        }
    }
}

/// Motivo da recusa de uma transição.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    IllegalTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    TooLateToCancel {
        min_lead: Duration,
    },
    TooLateToReschedule {
        min_lead: Duration,
    },
    MissingCheckIn,
    AlreadyCheckedIn,
    NotStartedYet,
    CheckedIn,
    MissingResult,
    IncoherentResult,
    /// O status mudou entre a leitura e a escrita condicional.
    StatusChanged,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::IllegalTransition { .. } => "illegal_transition",
            DenyReason::TooLateToCancel { .. } => "too_late_to_cancel",
            DenyReason::TooLateToReschedule { .. } => "too_late_to_reschedule",
            DenyReason::MissingCheckIn => "missing_check_in",
            DenyReason::AlreadyCheckedIn => "already_checked_in",
            DenyReason::NotStartedYet => "not_started_yet",
            DenyReason::CheckedIn => "checked_in",
            DenyReason::MissingResult => "missing_result",
            DenyReason::IncoherentResult => "incoherent_result",
            DenyReason::StatusChanged => "status_changed",
        }
    }

    /// Parâmetros interpolados na mensagem traduzida.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        match self {
            DenyReason::IllegalTransition { from, to } => {
                vec![("from", from.to_string()), ("to", to.to_string())]
            }
            DenyReason::TooLateToCancel { min_lead } | DenyReason::TooLateToReschedule { min_lead } => {
                vec![("hours", min_lead.num_hours().to_string())]
            }
            _ => Vec::new(),
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::IllegalTransition { from, to } => write!(f, "{} -> {}", from, to),
            DenyReason::TooLateToCancel { min_lead } | DenyReason::TooLateToReschedule { min_lead } => {
                write!(f, "{} ({}h)", self.code(), min_lead.num_hours())
            }
            other => f.write_str(other.code()),
        }
    }
}

/// Arestas do grafo de estados.
pub fn edge_allowed(from: AppointmentStatus, to: AppointmentStatus) -> bool {
    matches!(
        (from, to),
        (Cree, EnAttentePaiement)
            | (Cree, Confirme)
            | (Cree, Annule)
            | (EnAttentePaiement, Confirme)
            | (EnAttentePaiement, Annule)
            | (EnAttentePaiement, Reporte)
            | (Confirme, EnCours)
            | (Confirme, Annule)
            | (Confirme, Absent)
            | (Confirme, Reporte)
            | (EnCours, Termine)
    )
}

/// Regras de prazo. Os limites são inclusivos: exatamente 24h antes ainda pode cancelar.
pub fn check_timing(
    target: AppointmentStatus,
    now: DateTime<Utc>,
    start: DateTime<Utc>,
    gates: &GatePolicy,
) -> Result<(), DenyReason> {
    let lead = start - now;
    match target {
        Annule if lead < gates.cancel_min_lead => Err(DenyReason::TooLateToCancel {
            min_lead: gates.cancel_min_lead,
        }),
        Reporte if lead < gates.reschedule_min_lead => Err(DenyReason::TooLateToReschedule {
            min_lead: gates.reschedule_min_lead,
        }),
        Absent if now < start => Err(DenyReason::NotStartedYet),
        _ => Ok(()),
    }
}

/// Transição pedida por um usuário: aresta válida e prazos respeitados.
pub fn can_transition(
    current: AppointmentStatus,
    target: AppointmentStatus,
    now: DateTime<Utc>,
    start: DateTime<Utc>,
    gates: &GatePolicy,
) -> Result<(), DenyReason> {
    if !edge_allowed(current, target) {
        return Err(DenyReason::IllegalTransition {
            from: current,
            to: target,
        });
    }
    check_timing(target, now, start, gates)
}

/// Transição iniciada pelo sistema (expiração, falha de pagamento): ignora prazos.
pub fn can_system_transition(
    current: AppointmentStatus,
    target: AppointmentStatus,
) -> Result<(), DenyReason> {
    if edge_allowed(current, target) {
        Ok(())
    } else {
        Err(DenyReason::IllegalTransition {
            from: current,
            to: target,
        })
    }
}

/// Check-in: sub-etapa de CONFIRME, feita uma única vez.
pub fn can_check_in(current: AppointmentStatus, checked_in: bool) -> Result<(), DenyReason> {
    if current != Confirme {
        return Err(DenyReason::IllegalTransition {
            from: current,
            to: EnCours,
        });
    }
    if checked_in {
        return Err(DenyReason::AlreadyCheckedIn);
    }
    Ok(())
}

pub fn can_start(current: AppointmentStatus, checked_in: bool) -> Result<(), DenyReason> {
    can_system_transition(current, EnCours)?;
    if !checked_in {
        return Err(DenyReason::MissingCheckIn);
    }
    Ok(())
}

pub fn can_mark_absent(
    current: AppointmentStatus,
    checked_in: bool,
    now: DateTime<Utc>,
    start: DateTime<Utc>,
    gates: &GatePolicy,
) -> Result<(), DenyReason> {
    can_transition(current, Absent, now, start, gates)?;
    if checked_in {
        return Err(DenyReason::CheckedIn);
    }
    Ok(())
}

pub fn can_finish(current: AppointmentStatus, result: Option<&InspectionResult>) -> Result<(), DenyReason> {
    can_system_transition(current, Termine)?;
    match result {
        None => Err(DenyReason::MissingResult),
        Some(r) if !r.is_coherent() => Err(DenyReason::IncoherentResult),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::appointment::Verdict;
    use assert_matches::assert_matches;

    fn gates() -> GatePolicy {
        GatePolicy::from(&BookingPolicy::default())
    }

    fn start() -> DateTime<Utc> {
        "2030-01-10T10:00:00Z".parse().unwrap()
    }

    #[test]
    fn cancel_boundary_is_inclusive_at_24h() {
        let exactly = start() - Duration::hours(24);
        assert_eq!(can_transition(Confirme, Annule, exactly, start(), &gates()), Ok(()));

        let late = exactly + Duration::seconds(1);
        assert_matches!(
            can_transition(Confirme, Annule, late, start(), &gates()),
            Err(DenyReason::TooLateToCancel { min_lead }) if min_lead == Duration::hours(24)
        );
    }

    #[test]
    fn reschedule_boundary_is_inclusive_at_48h() {
        let exactly = start() - Duration::hours(48);
        assert_eq!(can_transition(Confirme, Reporte, exactly, start(), &gates()), Ok(()));
        assert_eq!(can_transition(EnAttentePaiement, Reporte, exactly, start(), &gates()), Ok(()));

        let late = exactly + Duration::minutes(1);
        assert_matches!(
            can_transition(Confirme, Reporte, late, start(), &gates()),
            Err(DenyReason::TooLateToReschedule { .. })
        );
    }

    #[test]
    fn thresholds_come_from_the_policy() {
        let relaxed = GatePolicy {
            cancel_min_lead: Duration::hours(2),
            reschedule_min_lead: Duration::hours(2),
        };
        let now = start() - Duration::hours(3);
        assert_eq!(can_transition(Confirme, Annule, now, start(), &relaxed), Ok(()));
        assert!(can_transition(Confirme, Annule, now, start(), &gates()).is_err());
    }

    #[test]
    fn terminal_states_have_no_exit() {
        for from in [Termine, Annule, Absent, Reporte] {
            for to in [Cree, EnAttentePaiement, Confirme, EnCours, Termine, Annule, Absent, Reporte] {
                assert!(!edge_allowed(from, to), "{} -> {}", from, to);
            }
        }
        assert_matches!(
            can_system_transition(EnCours, Annule),
            Err(DenyReason::IllegalTransition { from: EnCours, to: Annule })
        );
    }

    #[test]
    fn system_cancellation_ignores_lead_time() {
        assert_eq!(can_system_transition(EnAttentePaiement, Annule), Ok(()));
        assert_eq!(can_system_transition(Cree, Annule), Ok(()));
    }

    #[test]
    fn start_requires_check_in() {
        assert_eq!(can_start(Confirme, false), Err(DenyReason::MissingCheckIn));
        assert_eq!(can_start(Confirme, true), Ok(()));
        assert_eq!(can_check_in(Confirme, true), Err(DenyReason::AlreadyCheckedIn));
        assert_matches!(can_check_in(EnAttentePaiement, false), Err(DenyReason::IllegalTransition { .. }));
    }

    #[test]
    fn no_show_only_after_start_and_without_check_in() {
        let before = start() - Duration::minutes(1);
        assert_eq!(
            can_mark_absent(Confirme, false, before, start(), &gates()),
            Err(DenyReason::NotStartedYet)
        );
        assert_eq!(can_mark_absent(Confirme, false, start(), start(), &gates()), Ok(()));
        assert_eq!(
            can_mark_absent(Confirme, true, start(), start(), &gates()),
            Err(DenyReason::CheckedIn)
        );
    }

    #[test]
    fn finish_requires_a_coherent_result() {
        let ok = InspectionResult {
            verdict: Verdict::Defavorable,
            defauts_mineurs: 0,
            defauts_majeurs: 2,
            defauts_critiques: 0,
            observations: None,
        };
        let incoherent = InspectionResult {
            verdict: Verdict::Favorable,
            ..ok.clone()
        };
        assert_eq!(can_finish(EnCours, None), Err(DenyReason::MissingResult));
        assert_eq!(can_finish(EnCours, Some(&incoherent)), Err(DenyReason::IncoherentResult));
        assert_eq!(can_finish(EnCours, Some(&ok)), Ok(()));
        assert_matches!(can_finish(Confirme, Some(&ok)), Err(DenyReason::IllegalTransition { .. }));
    }

    #[test]
    fn reason_params_feed_the_message() {
        let reason = DenyReason::IllegalTransition { from: Annule, to: Confirme };
        assert_eq!(
            reason.params(),
            vec![("from", "ANNULE".to_string()), ("to", "CONFIRME".to_string())]
        );
        assert_eq!(reason.to_string(), "ANNULE -> CONFIRME");
    }
}
