// src/services/notification_service.rs

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::appointment::Appointment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Confirmed,
    Cancelled,
    Expired,
    Rescheduled,
    NoShow,
    Completed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Confirmed => "confirmed",
            EventKind::Cancelled => "cancelled",
            EventKind::Expired => "expired",
            EventKind::Rescheduled => "rescheduled",
            EventKind::NoShow => "no_show",
            EventKind::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub tenant_id: Uuid,
    pub appointment_id: Uuid,
    pub reference: String,
    pub at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn of(kind: EventKind, appointment: &Appointment, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            tenant_id: appointment.tenant_id,
            appointment_id: appointment.id,
            reference: appointment.reference.clone(),
            at,
        }
    }
}

/// Despacho de eventos do ciclo de vida (SMS, e-mail...). Fire-and-forget:
/// uma falha aqui nunca desfaz a transição que a originou.
pub trait Notifier: Send + Sync {
    fn dispatch(&self, event: &LifecycleEvent);
}

/// Implementação padrão: só registra no log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn dispatch(&self, event: &LifecycleEvent) {
        tracing::info!(
            event = event.kind.as_str(),
            tenant_id = %event.tenant_id,
            rdv_id = %event.appointment_id,
            reference = %event.reference,
            "Notificação de agendamento"
        );
    }
}
