// src/config.rs

use std::{env, str::FromStr, sync::Arc, time::Duration as StdDuration};

use anyhow::Context;
use chrono::Duration;
use sqlx::postgres::PgPoolOptions;

use crate::{
    common::{clock::{Clock, SystemClock}, i18n::I18nStore},
    db::{BookingStore, MemoryBookingStore, PgBookingStore, StoreSeed},
    models::policy::BookingPolicy,
    services::{
        appointment_service::AppointmentService,
        availability_service::AvailabilityService,
        booking_service::BookingService,
        notification_service::{LogNotifier, Notifier},
        payment_service::{PaymentGateway, PaymentService, SandboxGateway},
        policy_service::PolicyService,
        pricing_service::PricingService,
        reservation_service::ReservationService,
    },
};

// Lê uma variável opcional; ausente = padrão, presente mas inválida = erro.
fn var_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} inválida ({}): {}", key, raw, e)),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Sem banco configurado o serviço roda com o store em memória.
    pub database_url: Option<String>,
    pub seed_file: Option<String>,
    pub jwt_secret: String,
    pub webhook_secret: String,
    pub host: String,
    pub port: u16,
    pub db_max_connections: u32,
    pub sweep_interval: StdDuration,
    /// Padrões da política de agendamento; `tenant_policies` sobrescreve por tenant.
    pub policy: BookingPolicy,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = BookingPolicy::default();
        let policy = BookingPolicy {
            cancel_min_lead: Duration::hours(var_or("CANCEL_MIN_HOURS", 24)?),
            reschedule_min_lead: Duration::hours(var_or("RESCHEDULE_MIN_HOURS", 48)?),
            reservation_ttl: Duration::minutes(var_or("RESERVATION_TTL_MINUTES", 15)?),
            min_lead_days: var_or("BOOKING_MIN_LEAD_DAYS", defaults.min_lead_days)?,
            horizon_days: var_or("BOOKING_HORIZON_DAYS", defaults.horizon_days)?,
            granularity_minutes: var_or("SLOT_GRANULARITY_MINUTES", defaults.granularity_minutes)?,
            payment_exempt: var_or("PAYMENT_EXEMPT", defaults.payment_exempt)?,
        };
        let settings = Self {
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            seed_file: env::var("SEED_FILE").ok().filter(|path| !path.is_empty()),
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET deve ser definido")?,
            webhook_secret: env::var("WEBHOOK_SECRET").context("WEBHOOK_SECRET deve ser definido")?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: var_or("PORT", 3000)?,
            db_max_connections: var_or("DB_MAX_CONNECTIONS", 5)?,
            sweep_interval: StdDuration::from_secs(var_or("EXPIRY_SWEEP_INTERVAL_SECS", 60)?),
            policy,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Valores que passam no parse mas derrubariam o serviço depois da subida.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.policy.granularity_minutes <= 0 {
            anyhow::bail!("SLOT_GRANULARITY_MINUTES deve ser positivo");
        }
        // `tokio::time::interval` entra em pânico com período zero.
        if self.sweep_interval.is_zero() {
            anyhow::bail!("EXPIRY_SWEEP_INTERVAL_SECS deve ser positivo");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Conecta ao Postgres (e aplica as migrações) ou monta o store em memória.
async fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn BookingStore>> {
    match &settings.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(settings.db_max_connections)
                .acquire_timeout(StdDuration::from_secs(3))
                .connect(url)
                .await
                .context("Falha ao conectar ao banco de dados")?;
            tracing::info!("✅ Conexão com o banco de dados estabelecida com sucesso!");

            sqlx::migrate!()
                .run(&pool)
                .await
                .context("Falha ao rodar as migrações do banco de dados")?;
            tracing::info!("✅ Migrações do banco de dados executadas com sucesso!");

            Ok(Arc::new(PgBookingStore::new(pool)))
        }
        None => {
            let seed = match &settings.seed_file {
                Some(path) => StoreSeed::from_file(path)?,
                None => StoreSeed::default(),
            };
            tracing::warn!(
                centres = seed.centres.len(),
                "DATABASE_URL ausente: usando o store em memória (dados não persistem)"
            );
            Ok(Arc::new(MemoryBookingStore::new(seed)))
        }
    }
}

/// Dependências externas do núcleo, trocadas nos testes.
pub struct Collaborators {
    pub store: Arc<dyn BookingStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

// O estado compartilhado que será acessível em toda a aplicação
#[derive(Clone)]
pub struct AppState {
    pub jwt_secret: String,
    pub webhook_secret: String,
    pub i18n_store: Arc<I18nStore>,
    pub clock: Arc<dyn Clock>,
    pub availability_service: AvailabilityService,
    pub pricing_service: PricingService,
    pub reservation_service: ReservationService,
    pub appointment_service: AppointmentService,
    pub payment_service: PaymentService,
    pub booking_service: BookingService,
}

impl AppState {
    pub async fn new(settings: &Settings) -> anyhow::Result<Self> {
        let store = open_store(settings).await?;
        Self::assemble(
            settings,
            Collaborators {
                store,
                gateway: Arc::new(SandboxGateway::new()),
                notifier: Arc::new(LogNotifier),
                clock: Arc::new(SystemClock),
            },
        )
    }

    // --- Monta o gráfico de dependências ---
    pub fn assemble(settings: &Settings, deps: Collaborators) -> anyhow::Result<Self> {
        let Collaborators {
            store,
            gateway,
            notifier,
            clock,
        } = deps;

        let policies = PolicyService::new(store.clone(), settings.policy.clone());
        let availability_service = AvailabilityService::new(store.clone(), policies.clone());
        let pricing_service = PricingService::new(store.clone());
        let reservation_service = ReservationService::new(
            store.clone(),
            availability_service.clone(),
            pricing_service.clone(),
            policies.clone(),
            notifier.clone(),
        );
        let appointment_service = AppointmentService::new(
            store.clone(),
            reservation_service.clone(),
            policies.clone(),
            gateway.clone(),
            notifier.clone(),
        );
        let payment_service = PaymentService::new(
            store.clone(),
            reservation_service.clone(),
            gateway.clone(),
            notifier.clone(),
        );
        let booking_service = BookingService::new(store, reservation_service.clone(), policies, gateway, notifier);

        Ok(Self {
            jwt_secret: settings.jwt_secret.clone(),
            webhook_secret: settings.webhook_secret.clone(),
            i18n_store: Arc::new(I18nStore::load()?),
            clock,
            availability_service,
            pricing_service,
            reservation_service,
            appointment_service,
            payment_service,
            booking_service,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use crate::test_support::fixture;

    #[test]
    fn zero_sweep_interval_is_rejected() {
        let mut settings = fixture().settings();
        assert!(settings.validate().is_ok());

        settings.sweep_interval = StdDuration::ZERO;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("EXPIRY_SWEEP_INTERVAL_SECS"), "{}", err);
    }

    #[test]
    fn zero_granularity_is_rejected() {
        let mut settings = fixture().settings();
        settings.policy.granularity_minutes = 0;
        assert!(settings.validate().is_err());
    }
}
