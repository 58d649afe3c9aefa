use charter_core::repository::CatalogProvider;
use charter_core::vessel::{AddOn, PaymentModel, Vessel};
use charter_core::{CoreError, CoreResult};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// Default share of a `split_payment` line collected at checkout.
pub const DEFAULT_UPFRONT_PERCENT: u8 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BasePrice {
    pub currency: String,
    pub amount_cents: i64,
}

/// How one add-on line splits between the gateway and the vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AddOnCharge {
    pub line_total_cents: i64,
    /// Collected through the checkout session.
    pub upfront_cents: i64,
    /// Settled with the vendor later.
    pub balance_due_cents: i64,
}

/// Resolves charter rates and add-on splits. All amounts are integer cents.
#[derive(Clone)]
pub struct PricingResolver {
    catalog: Arc<dyn CatalogProvider>,
}

impl PricingResolver {
    pub fn new(catalog: Arc<dyn CatalogProvider>) -> Self {
        Self { catalog }
    }

    /// Base rate for `hours` on `vessel`.
    ///
    /// A duration without an explicit entry fails with `PricingUnavailable`;
    /// `extra_hour_cents` is never used to synthesize a missing rate.
    pub async fn base_price(&self, vessel: &Vessel, hours: u32) -> CoreResult<BasePrice> {
        let unavailable = || CoreError::PricingUnavailable {
            vessel: vessel.code.clone(),
            hours,
        };

        let rule = self
            .catalog
            .pricing_rule(vessel.id)
            .await?
            .ok_or_else(unavailable)?;

        match rule.base_rates.get(&hours) {
            Some(&amount_cents) if amount_cents >= 0 => Ok(BasePrice {
                currency: rule.currency.to_lowercase(),
                amount_cents,
            }),
            Some(&amount_cents) => {
                warn!(vessel = %vessel.code, hours, amount_cents, "Negative base rate in catalog");
                Err(unavailable())
            }
            None => Err(unavailable()),
        }
    }
}

/// Upfront/balance split for `quantity` units of `add_on`.
pub fn add_on_charge(add_on: &AddOn, quantity: u32) -> CoreResult<AddOnCharge> {
    if quantity == 0 {
        return Err(CoreError::InvalidRequest(format!(
            "quantity for add-on {} must be at least 1",
            add_on.code
        )));
    }
    if add_on.unit_price_cents < 0 {
        return Err(CoreError::Internal(format!(
            "add-on {} has a negative unit price",
            add_on.code
        )));
    }

    let qty = i64::from(quantity);
    let line_total_cents = add_on.unit_price_cents * qty;

    let upfront_cents = match add_on.payment_model {
        PaymentModel::FullCollection => line_total_cents,
        PaymentModel::VendorDirect => 0,
        PaymentModel::SplitPayment => {
            let percent = add_on.upfront_percent.unwrap_or(DEFAULT_UPFRONT_PERCENT);
            if percent > 100 {
                return Err(CoreError::Internal(format!(
                    "add-on {} collects {percent}% upfront",
                    add_on.code
                )));
            }
            line_total_cents * i64::from(percent) / 100
        }
        PaymentModel::FlatFee => {
            let fee = add_on.flat_fee_cents.unwrap_or(0).max(0) * qty;
            fee.min(line_total_cents)
        }
    };

    Ok(AddOnCharge {
        line_total_cents,
        upfront_cents,
        balance_due_cents: line_total_cents - upfront_cents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{vessel, StubCatalog};
    use charter_core::vessel::PricingRule;
    use uuid::Uuid;

    fn add_on(model: PaymentModel) -> AddOn {
        AddOn {
            id: Uuid::new_v4(),
            code: "CATER".into(),
            name: "Catering".into(),
            vendor: Some("Harbor Kitchen".into()),
            payment_model: model,
            unit_price_cents: 10_000,
            upfront_percent: None,
            flat_fee_cents: Some(1_500),
            active: true,
        }
    }

    #[tokio::test]
    async fn test_missing_rate_for_allowed_duration() {
        let v = vessel("37-AXO", &[4, 6, 8]);
        let mut stub = StubCatalog::default();
        stub.pricing.insert(
            v.id,
            PricingRule {
                vessel_id: v.id,
                currency: "USD".into(),
                base_rates: [(4, 120_000), (8, 210_000)].into_iter().collect(),
                extra_hour_cents: Some(25_000),
                deposit_policy: serde_json::Value::Null,
            },
        );
        let resolver = PricingResolver::new(Arc::new(stub));

        let four = resolver.base_price(&v, 4).await.unwrap();
        assert_eq!(four.amount_cents, 120_000);
        assert_eq!(four.currency, "usd");

        let err = resolver.base_price(&v, 6).await.unwrap_err();
        assert!(matches!(err, CoreError::PricingUnavailable { hours: 6, .. }));
    }

    #[tokio::test]
    async fn test_no_pricing_rule_at_all() {
        let v = vessel("37-AXO", &[4]);
        let resolver = PricingResolver::new(Arc::new(StubCatalog::default()));
        let err = resolver.base_price(&v, 4).await.unwrap_err();
        assert_eq!(err.code(), "PRICING_UNAVAILABLE");
    }

    #[test]
    fn test_payment_model_splits() {
        let split = add_on_charge(&add_on(PaymentModel::SplitPayment), 2).unwrap();
        assert_eq!((split.upfront_cents, split.balance_due_cents), (10_000, 10_000));

        let full = add_on_charge(&add_on(PaymentModel::FullCollection), 2).unwrap();
        assert_eq!((full.upfront_cents, full.balance_due_cents), (20_000, 0));

        let flat = add_on_charge(&add_on(PaymentModel::FlatFee), 2).unwrap();
        assert_eq!((flat.upfront_cents, flat.balance_due_cents), (3_000, 17_000));

        let direct = add_on_charge(&add_on(PaymentModel::VendorDirect), 2).unwrap();
        assert_eq!((direct.upfront_cents, direct.balance_due_cents), (0, 20_000));
    }

    #[test]
    fn test_split_percent_override_and_rounding() {
        let mut a = add_on(PaymentModel::SplitPayment);
        a.unit_price_cents = 999;
        a.upfront_percent = Some(30);
        let charge = add_on_charge(&a, 1).unwrap();
        // Floor on the upfront share; the vendor absorbs the remainder.
        assert_eq!(charge.upfront_cents, 299);
        assert_eq!(charge.balance_due_cents, 700);
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let err = add_on_charge(&add_on(PaymentModel::FullCollection), 0).unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
    }
}
