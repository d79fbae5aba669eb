// src/services/pricing_service.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::BookingStore,
    models::pricing::{
        AppliedPromotion, DiscountKind, PriceQuote, PromoCheckResponse, PromoRejection, Promotion, Tariff,
    },
};

fn cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Desconto limitado a [0, base]: o total nunca fica negativo.
pub fn discount_for(base: Decimal, kind: DiscountKind, value: Decimal) -> Decimal {
    let raw = match kind {
        DiscountKind::Pourcentage => cents(base * value / Decimal::ONE_HUNDRED),
        DiscountKind::Montant => cents(value),
    };
    raw.max(Decimal::ZERO).min(base)
}

/// Divide um total TTC em (HT, TVA) de forma que HT + TVA = TTC.
pub fn split_tax(total: Decimal, vat_rate: Decimal) -> (Decimal, Decimal) {
    let divisor = Decimal::ONE + vat_rate / Decimal::ONE_HUNDRED;
    if divisor <= Decimal::ZERO {
        return (total, Decimal::ZERO);
    }
    let ht = cents(total / divisor);
    (ht, total - ht)
}

/// Valida o código contra escopo, validade e orçamento de uso.
pub fn validate_promotion<'a>(
    promotion: Option<&'a Promotion>,
    centre_id: Uuid,
    service_type: &str,
    vehicle_type: &str,
    now: DateTime<Utc>,
) -> Result<&'a Promotion, PromoRejection> {
    let promo = promotion.ok_or(PromoRejection::Unknown)?;
    if !promo.active {
        return Err(PromoRejection::Inactive);
    }
    if now < promo.valid_from {
        return Err(PromoRejection::NotYetValid);
    }
    if now > promo.valid_until {
        return Err(PromoRejection::Expired);
    }
    let in_scope = (promo.centre_ids.is_empty() || promo.centre_ids.contains(&centre_id))
        && (promo.service_types.is_empty() || promo.service_types.iter().any(|s| s == service_type))
        && (promo.vehicle_types.is_empty() || promo.vehicle_types.iter().any(|v| v == vehicle_type));
    if !in_scope {
        return Err(PromoRejection::OutOfScope);
    }
    if promo.max_uses.is_some_and(|max| promo.used_count >= max) {
        return Err(PromoRejection::Exhausted);
    }
    Ok(promo)
}

/// Tarifa do centro, senão a da rede.
pub fn pick_tariff(tariffs: &[Tariff], centre_id: Uuid) -> Option<&Tariff> {
    tariffs
        .iter()
        .find(|t| t.centre_id == Some(centre_id))
        .or_else(|| tariffs.iter().find(|t| t.centre_id.is_none()))
}

pub fn quote_with(tariff: &Tariff, promotion: Option<&Promotion>) -> PriceQuote {
    let base = tariff.price_ttc;
    let discount = promotion
        .map(|p| discount_for(base, p.kind, p.value))
        .unwrap_or(Decimal::ZERO);
    let total = base - discount;
    let (amount_ht, amount_tva) = split_tax(total, tariff.vat_rate);
    PriceQuote {
        base,
        discount,
        total,
        amount_ht,
        amount_tva,
        promotion: promotion.map(|p| AppliedPromotion {
            id: p.id,
            code: p.code.clone(),
            kind: p.kind,
            value: p.value,
        }),
    }
}

/// `None` para ausente ou em branco: "sem código" é diferente de "código inválido".
pub fn normalize_code(code: Option<&str>) -> Option<String> {
    code.map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_uppercase)
}

#[derive(Clone)]
pub struct PricingService {
    store: Arc<dyn BookingStore>,
}

impl PricingService {
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self { store }
    }

    async fn tariff(
        &self,
        tenant_id: Uuid,
        centre_id: Uuid,
        service_type: &str,
        vehicle_type: &str,
    ) -> Result<Tariff, AppError> {
        let tariffs = self.store.tariffs(tenant_id, service_type, vehicle_type).await?;
        pick_tariff(&tariffs, centre_id)
            .cloned()
            .ok_or_else(|| AppError::TariffNotFound {
                service_type: service_type.to_string(),
                vehicle_type: vehicle_type.to_string(),
            })
    }

    /// Preço com o código aplicado. Código recusado vira `PromoInvalid`.
    pub async fn quote(
        &self,
        tenant_id: Uuid,
        centre_id: Uuid,
        service_type: &str,
        vehicle_type: &str,
        promo_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<PriceQuote, AppError> {
        let tariff = self.tariff(tenant_id, centre_id, service_type, vehicle_type).await?;
        let Some(code) = normalize_code(promo_code) else {
            return Ok(quote_with(&tariff, None));
        };
        let promotion = self.store.promotion_by_code(tenant_id, &code).await?;
        let promo = validate_promotion(promotion.as_ref(), centre_id, service_type, vehicle_type, now)
            .map_err(AppError::PromoInvalid)?;
        Ok(quote_with(&tariff, Some(promo)))
    }

    /// Verificação para o formulário: código ruim não é erro, vem com `valid = false` e o motivo.
    pub async fn check_promo(
        &self,
        tenant_id: Uuid,
        centre_id: Uuid,
        service_type: &str,
        vehicle_type: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<PromoCheckResponse, AppError> {
        let tariff = self.tariff(tenant_id, centre_id, service_type, vehicle_type).await?;
        let plain = quote_with(&tariff, None);

        let promotion = match normalize_code(Some(code)) {
            Some(code) => self.store.promotion_by_code(tenant_id, &code).await?,
            None => None,
        };
        match validate_promotion(promotion.as_ref(), centre_id, service_type, vehicle_type, now) {
            Ok(promo) => {
                let quote = quote_with(&tariff, Some(promo));
                Ok(PromoCheckResponse {
                    valid: true,
                    type_reduction: Some(promo.kind),
                    valeur: Some(promo.value),
                    prix_base: quote.base,
                    nouveau_prix: quote.total,
                    raison: None,
                })
            }
            Err(reason) => Ok(PromoCheckResponse {
                valid: false,
                type_reduction: None,
                valeur: None,
                prix_base: plain.base,
                nouveau_prix: plain.total,
                raison: Some(reason),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixture;
    use assert_matches::assert_matches;
    use chrono::Duration;

    fn d(raw: &str) -> Decimal {
        raw.parse().unwrap()
    }

    #[test]
    fn percentage_and_amount_are_capped() {
        assert_eq!(discount_for(d("78.00"), DiscountKind::Pourcentage, d("10")), d("7.80"));
        assert_eq!(discount_for(d("78.00"), DiscountKind::Pourcentage, d("150")), d("78.00"));
        assert_eq!(discount_for(d("40.00"), DiscountKind::Montant, d("50")), d("40.00"));
        assert_eq!(discount_for(d("40.00"), DiscountKind::Montant, d("-5")), d("0"));
    }

    #[test]
    fn tax_split_adds_up() {
        assert_eq!(split_tax(d("78.00"), d("20")), (d("65.00"), d("13.00")));
        assert_eq!(split_tax(d("70.20"), d("20")), (d("58.50"), d("11.70")));
        let (ht, tva) = split_tax(d("33.33"), d("20"));
        assert_eq!(ht + tva, d("33.33"));
    }

    #[test]
    fn blank_code_means_no_code() {
        assert_eq!(normalize_code(Some("  ")), None);
        assert_eq!(normalize_code(Some(" summer10 ")), Some("SUMMER10".to_string()));
    }

    #[tokio::test]
    async fn scenario_d_summer10_on_ctp_and_cvp() {
        let fx = fixture();
        let pricing = PricingService::new(fx.store.clone());

        let quote = pricing
            .quote(fx.tenant_id, fx.centre_id, "CTP", "VP", Some("SUMMER10"), fx.now)
            .await
            .unwrap();
        assert_eq!(quote.base, d("78.00"));
        assert_eq!(quote.discount, d("7.80"));
        assert_eq!(quote.total, d("70.20"));
        assert_eq!(quote.amount_ht + quote.amount_tva, quote.total);

        let err = pricing
            .quote(fx.tenant_id, fx.centre_id, "CVP", "VP", Some("SUMMER10"), fx.now)
            .await
            .unwrap_err();
        assert_matches!(err, AppError::PromoInvalid(PromoRejection::OutOfScope));

        let plain = pricing
            .quote(fx.tenant_id, fx.centre_id, "CVP", "VP", None, fx.now)
            .await
            .unwrap();
        assert_eq!(plain.total, d("40.00"));
    }

    #[tokio::test]
    async fn expired_code_leaves_price_unchanged() {
        let fx = fixture();
        let pricing = PricingService::new(fx.store.clone());
        let later = fx.now + Duration::days(400);

        let check = pricing
            .check_promo(fx.tenant_id, fx.centre_id, "CTP", "VP", "summer10", later)
            .await
            .unwrap();
        assert!(!check.valid);
        assert_eq!(check.raison, Some(PromoRejection::Expired));
        assert_eq!(check.nouveau_prix, d("78.00"));

        let unknown = pricing
            .check_promo(fx.tenant_id, fx.centre_id, "CTP", "VP", "NOPE", fx.now)
            .await
            .unwrap();
        assert_eq!(unknown.raison, Some(PromoRejection::Unknown));
    }

    #[tokio::test]
    async fn missing_tariff_is_reported() {
        let fx = fixture();
        let pricing = PricingService::new(fx.store.clone());
        let err = pricing
            .quote(fx.tenant_id, fx.centre_id, "CTP", "PL", None, fx.now)
            .await
            .unwrap_err();
        assert_matches!(err, AppError::TariffNotFound { .. });
    }
}
