// src/test_support.rs
//
// Rede de teste: um centro aberto 08:00-18:00 todos os dias, duas linhas,
// um controlador, tarifas CTP/VP 78,00 e CVP/VP 40,00, promoção SUMMER10.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use rust_decimal::Decimal;
use sqlx::types::Json;
use uuid::Uuid;

use crate::{
    common::clock::FixedClock,
    config::{AppState, Collaborators, Settings},
    db::{BookingStore, MemoryBookingStore, StoreSeed},
    middleware::auth::Claims,
    models::{
        appointment::{Appointment, AppointmentStatus, ClientInfo, PaymentState, SourceChannel, VehicleInfo},
        payment::{BookingReceipt, SettlementStatus},
        policy::{BookingPolicy, TenantPolicy},
        pricing::{DiscountKind, Promotion, Tariff},
        scheduling::{Centre, CentreDay, Controller, DurationRule, OpeningHours, Plage},
    },
    services::{
        appointment_service::AppointmentService,
        availability_service::{AvailabilityService, SlotQuery},
        booking_service::BookingService,
        notification_service::{EventKind, LifecycleEvent, Notifier},
        payment_service::{PaymentService, SandboxGateway, Settlement},
        reservation_service::{reference_for, ReservationRequest, ReservationService},
    },
};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingNotifier {
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().unwrap().iter().map(|e| e.kind).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn dispatch(&self, event: &LifecycleEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[derive(Debug, Default)]
pub struct FixtureOptions {
    pub declining_gateway: bool,
    pub payment_exempt: bool,
    pub utc_offset_minutes: i32,
}

pub struct Fixture {
    pub tenant_id: Uuid,
    pub centre_id: Uuid,
    pub controller_id: Uuid,
    /// Terça-feira, dentro da janela de reserva.
    pub date: NaiveDate,
    pub now: DateTime<Utc>,
    pub store: Arc<dyn BookingStore>,
    pub memory: Arc<MemoryBookingStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub gateway: Arc<SandboxGateway>,
    pub clock: Arc<FixedClock>,
    seed: StoreSeed,
}

pub fn fixture() -> Fixture {
    fixture_with(|_| {})
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn utc(raw: &str) -> DateTime<Utc> {
    raw.parse().unwrap()
}

pub fn fixture_with(configure: impl FnOnce(&mut FixtureOptions)) -> Fixture {
    let mut options = FixtureOptions::default();
    configure(&mut options);

    let tenant_id = Uuid::new_v4();
    let centre_id = Uuid::new_v4();
    let controller_id = Uuid::new_v4();

    let seed = StoreSeed {
        centres: vec![Centre {
            id: centre_id,
            tenant_id,
            name: "Centre Lyon 7".into(),
            address: Some("12 rue de Gerland, Lyon".into()),
            lines: 2,
            certifications: vec!["CTP".into(), "CVP".into()],
            utc_offset_minutes: options.utc_offset_minutes,
            active: true,
        }],
        opening_hours: (0..=6)
            .map(|weekday| OpeningHours {
                centre_id,
                weekday,
                opens_at: hm(8, 0),
                closes_at: hm(18, 0),
                break_start: None,
                break_end: None,
            })
            .collect(),
        controllers: vec![Controller {
            id: controller_id,
            centre_id,
            name: "Julien Martin".into(),
            certifications: vec!["CTP".into(), "CVP".into()],
            active: true,
        }],
        plages: (0..=6)
            .map(|weekday| Plage {
                controller_id,
                weekday,
                starts_at: hm(8, 0),
                ends_at: hm(18, 0),
                pause_start: None,
                pause_end: None,
            })
            .collect(),
        blocks: Vec::new(),
        duration_rules: ["CTP", "CVP"]
            .into_iter()
            .map(|service| DurationRule {
                tenant_id,
                service_type: service.into(),
                vehicle_type: "VP".into(),
                fuel_type: None,
                minutes: 30,
            })
            .collect(),
        tariffs: [("CTP", "78.00"), ("CVP", "40.00")]
            .into_iter()
            .map(|(service, price)| Tariff {
                tenant_id,
                centre_id: None,
                service_type: service.into(),
                vehicle_type: "VP".into(),
                price_ttc: price.parse().unwrap(),
                vat_rate: "20".parse().unwrap(),
            })
            .collect(),
        promotions: vec![Promotion {
            id: Uuid::new_v4(),
            tenant_id,
            code: "SUMMER10".into(),
            kind: DiscountKind::Pourcentage,
            value: "10".parse().unwrap(),
            centre_ids: Vec::new(),
            service_types: vec!["CTP".into()],
            vehicle_types: Vec::new(),
            valid_from: utc("2029-01-01T00:00:00Z"),
            valid_until: utc("2030-12-31T23:59:59Z"),
            max_uses: None,
            used_count: 0,
            active: true,
        }],
        tenant_policies: if options.payment_exempt {
            vec![TenantPolicy {
                tenant_id,
                payment_exempt: Some(true),
                ..Default::default()
            }]
        } else {
            Vec::new()
        },
    };

    let memory = Arc::new(MemoryBookingStore::new(seed.clone()));
    let now = utc("2030-01-07T09:00:00Z");

    Fixture {
        tenant_id,
        centre_id,
        controller_id,
        date: NaiveDate::from_ymd_opt(2030, 1, 8).unwrap(),
        now,
        store: memory.clone(),
        memory,
        notifier: Arc::new(RecordingNotifier::default()),
        gateway: Arc::new(if options.declining_gateway {
            SandboxGateway::declining()
        } else {
            SandboxGateway::new()
        }),
        clock: Arc::new(FixedClock::new(now)),
        seed,
    }
}

impl Fixture {
    pub fn at(&self, h: u32, m: u32) -> NaiveTime {
        hm(h, m)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            database_url: None,
            seed_file: None,
            jwt_secret: JWT_SECRET.into(),
            webhook_secret: WEBHOOK_SECRET.into(),
            host: "127.0.0.1".into(),
            port: 0,
            db_max_connections: 1,
            sweep_interval: std::time::Duration::from_secs(60),
            policy: BookingPolicy::default(),
        }
    }

    pub fn state(&self) -> AppState {
        AppState::assemble(
            &self.settings(),
            Collaborators {
                store: self.store.clone(),
                gateway: self.gateway.clone(),
                notifier: self.notifier.clone(),
                clock: self.clock.clone(),
            },
        )
        .unwrap()
    }

    pub fn availability(&self) -> AvailabilityService {
        self.state().availability_service
    }

    pub fn reservations(&self) -> ReservationService {
        self.state().reservation_service
    }

    pub fn appointments(&self) -> AppointmentService {
        self.state().appointment_service
    }

    pub fn payments(&self) -> PaymentService {
        self.state().payment_service
    }

    pub fn bookings(&self) -> BookingService {
        self.state().booking_service
    }

    /// O dia de `self.date` tal como o store o devolveria, sem ocupação.
    pub fn day(&self) -> CentreDay {
        CentreDay {
            centre: self.seed.centres[0].clone(),
            opening_hours: self.seed.opening_hours.clone(),
            controllers: self.seed.controllers.clone(),
            plages: self.seed.plages.clone(),
            blocks: Vec::new(),
            claims: Vec::new(),
            appointments: Vec::new(),
        }
    }

    /// Agendamento CONFIRME de 30 min na linha 1, fora do store.
    pub fn appointment(&self, start: NaiveTime) -> Appointment {
        let id = Uuid::new_v4();
        let price: Decimal = "78.00".parse().unwrap();
        Appointment {
            id,
            tenant_id: self.tenant_id,
            centre_id: self.centre_id,
            controller_id: Some(self.controller_id),
            line: 1,
            reference: reference_for(self.date, id),
            date: self.date,
            start_time: start,
            end_time: start + Duration::minutes(30),
            starts_at: self.date.and_time(start).and_utc(),
            service_type: "CTP".into(),
            vehicle_type: "VP".into(),
            fuel_type: None,
            client: Json(self.client()),
            vehicle: Json(self.vehicle()),
            status: AppointmentStatus::Confirme,
            source: SourceChannel::Web,
            base_price: price,
            discount: Decimal::ZERO,
            amount_ht: "65.00".parse().unwrap(),
            amount_tva: "13.00".parse().unwrap(),
            amount_ttc: price,
            promo_code: None,
            promotion_id: None,
            payment_status: PaymentState::Paye,
            checked_in_at: None,
            started_at: None,
            completed_at: None,
            result: None,
            cancel_reason: None,
            expires_at: None,
            rescheduled_from: None,
            rescheduled_to: None,
            created_at: self.now,
            updated_at: self.now,
        }
    }

    fn client(&self) -> ClientInfo {
        ClientInfo {
            client_id: None,
            nom: "Dupont".into(),
            prenom: Some("Marie".into()),
            email: Some("marie.dupont@example.fr".into()),
            telephone: Some("+33612345678".into()),
        }
    }

    fn vehicle(&self) -> VehicleInfo {
        VehicleInfo {
            immatriculation: "AB-123-CD".into(),
            marque: Some("Renault".into()),
            modele: Some("Clio".into()),
        }
    }

    pub fn query(&self) -> SlotQuery {
        SlotQuery {
            centre_id: self.centre_id,
            date: self.date,
            service_type: "CTP".into(),
            vehicle_type: Some("VP".into()),
            fuel_type: None,
        }
    }

    pub fn request(&self, start: NaiveTime) -> ReservationRequest {
        self.request_on(self.date, start)
    }

    pub fn request_on(&self, date: NaiveDate, start: NaiveTime) -> ReservationRequest {
        ReservationRequest {
            centre_id: self.centre_id,
            date,
            start_time: start,
            service_type: "CTP".into(),
            vehicle_type: "VP".into(),
            fuel_type: None,
            controller_id: None,
            client: self.client(),
            vehicle: self.vehicle(),
            source: SourceChannel::Web,
            promo_code: None,
            expected_total: None,
        }
    }

    pub async fn book(&self, start: NaiveTime) -> BookingReceipt {
        self.book_on(self.date, start).await
    }

    pub async fn book_on(&self, date: NaiveDate, start: NaiveTime) -> BookingReceipt {
        self.bookings()
            .create_with_payment(self.tenant_id, &self.request_on(date, start), self.now)
            .await
            .unwrap()
    }

    /// Reserva e liquida o pagamento: agendamento CONFIRME e PAYE.
    pub async fn confirmed(&self, start: NaiveTime) -> Appointment {
        self.confirmed_on(self.date, start).await
    }

    pub async fn confirmed_on(&self, date: NaiveDate, start: NaiveTime) -> Appointment {
        let receipt = self.book_on(date, start).await;
        self.payments()
            .settle(&self.settlement(&receipt, SettlementStatus::Completed), self.now)
            .await
            .unwrap();
        self.memory.appointment_by_id(receipt.rdv_id).await.unwrap()
    }

    pub fn settlement(&self, receipt: &BookingReceipt, status: SettlementStatus) -> Settlement {
        Settlement {
            appointment_id: receipt.rdv_id,
            transaction_id: receipt.payment_intent_id.clone().unwrap_or_default(),
            status,
            amount: Some(receipt.prix_total),
        }
    }

    /// JWT do tenant da fixture com as capacidades informadas.
    pub fn token(&self, capabilities: &[&str]) -> String {
        let iat = self.now.timestamp() as usize;
        let claims = Claims {
            sub: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            // `exp` é validado contra o relógio real
            exp: (Utc::now().timestamp() + 3600) as usize,
            iat,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(JWT_SECRET.as_bytes())).unwrap()
    }
}
