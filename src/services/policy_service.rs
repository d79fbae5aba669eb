// src/services/policy_service.rs

use std::sync::Arc;

use uuid::Uuid;

use crate::{common::error::AppError, db::BookingStore, models::policy::BookingPolicy};

/// Resolve a política efetiva de um tenant: padrões do ambiente + linha `tenant_policies`.
#[derive(Clone)]
pub struct PolicyService {
    store: Arc<dyn BookingStore>,
    defaults: BookingPolicy,
}

impl PolicyService {
    pub fn new(store: Arc<dyn BookingStore>, defaults: BookingPolicy) -> Self {
        Self { store, defaults }
    }

    pub async fn resolve(&self, tenant_id: Uuid) -> Result<BookingPolicy, AppError> {
        let row = self.store.tenant_policy(tenant_id).await?;
        Ok(self.defaults.with_overrides(row.as_ref()))
    }
}
