// src/models/pricing.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Tarifa TTC. Sem `centre_id` vale para toda a rede (tenant).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Tariff {
    #[schema(ignore)]
    pub tenant_id: Uuid,
    pub centre_id: Option<Uuid>,
    #[schema(example = "CTP")]
    pub service_type: String,
    #[schema(example = "VP")]
    pub vehicle_type: String,
    #[schema(example = "78.00")]
    pub price_ttc: Decimal,
    /// Em percentual, ex.: 20.0
    #[schema(example = "20.0")]
    pub vat_rate: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "discount_kind", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountKind {
    Pourcentage,
    Montant,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Promotion {
    pub id: Uuid,
    #[schema(ignore)]
    pub tenant_id: Uuid,
    #[schema(example = "SUMMER10")]
    pub code: String,
    pub kind: DiscountKind,
    #[schema(example = "10")]
    pub value: Decimal,
    /// Listas vazias = sem restrição.
    #[serde(default)]
    pub centre_ids: Vec<Uuid>,
    #[serde(default)]
    pub service_types: Vec<String>,
    #[serde(default)]
    pub vehicle_types: Vec<String>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub max_uses: Option<i32>,
    #[serde(default)]
    pub used_count: i32,
    pub active: bool,
}

/// Motivo pelo qual um código foi recusado. Nunca é ignorado em silêncio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PromoRejection {
    Unknown,
    Inactive,
    NotYetValid,
    Expired,
    OutOfScope,
    Exhausted,
}

impl PromoRejection {
    pub fn code(&self) -> &'static str {
        match self {
            PromoRejection::Unknown => "unknown",
            PromoRejection::Inactive => "inactive",
            PromoRejection::NotYetValid => "not_yet_valid",
            PromoRejection::Expired => "expired",
            PromoRejection::OutOfScope => "out_of_scope",
            PromoRejection::Exhausted => "exhausted",
        }
    }
}

impl std::fmt::Display for PromoRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AppliedPromotion {
    pub id: Uuid,
    pub code: String,
    pub kind: DiscountKind,
    pub value: Decimal,
}

/// Resultado do cálculo de preço: base, desconto e total (TTC) com a divisão HT/TVA.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PriceQuote {
    pub base: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub amount_ht: Decimal,
    pub amount_tva: Decimal,
    pub promotion: Option<AppliedPromotion>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PromoCheckResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_reduction: Option<DiscountKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valeur: Option<Decimal>,
    pub prix_base: Decimal,
    pub nouveau_prix: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raison: Option<PromoRejection>,
}
