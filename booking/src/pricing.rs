//! Pricing calculator.
//!
//! A pure function from visitors, base price and addons to an itemized
//! breakdown. Every discount line and the tax line are kept individually for
//! the receipt; nothing here touches state or time.
//!
//! ```text
//! subtotal       = base_price × visitors
//! discounts      = Σ per-visitor discount (at most one each)
//! addon_total    = Σ price × quantity
//! taxable_amount = subtotal − discounts + addon_total
//! tax            = taxable_amount × rate   (half-up to the minor unit)
//! total          = taxable_amount + tax
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AddonItem, Money, Visitor};

/// Age below which the student discount applies
pub const STUDENT_MAX_AGE_EXCLUSIVE: i32 = 18;
/// Age from which the senior discount applies
pub const SENIOR_MIN_AGE: i32 = 60;
/// Student discount, basis points of the base price
pub const STUDENT_DISCOUNT_BPS: u32 = 5_000;
/// Senior discount, basis points of the base price
pub const SENIOR_DISCOUNT_BPS: u32 = 3_000;
/// Default tax rate (GST 18%)
pub const DEFAULT_TAX_BPS: u32 = 1_800;

/// Input errors. These are caller mistakes and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    /// No visitors supplied
    #[error("at least one visitor is required")]
    NoVisitors,
    /// A visitor has a negative age
    #[error("visitor {index} has a negative age ({age})")]
    NegativeAge {
        /// Position in the visitor list
        index: usize,
        /// Supplied age
        age: i32,
    },
    /// An intermediate amount does not fit the money type
    #[error("amount overflow while pricing")]
    Overflow,
}

/// Discount categories
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    /// Under 18
    Student,
    /// 60 and over
    Senior,
}

impl DiscountKind {
    /// Discount applicable to an age, if any
    #[must_use]
    pub const fn for_age(age: i32) -> Option<Self> {
        if age < STUDENT_MAX_AGE_EXCLUSIVE {
            Some(Self::Student)
        } else if age >= SENIOR_MIN_AGE {
            Some(Self::Senior)
        } else {
            None
        }
    }

    /// Share of the base price taken off, in basis points
    #[must_use]
    pub const fn rate_bps(self) -> u32 {
        match self {
            Self::Student => STUDENT_DISCOUNT_BPS,
            Self::Senior => SENIOR_DISCOUNT_BPS,
        }
    }

    /// Receipt label
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Student => "Student discount (50%)",
            Self::Senior => "Senior citizen discount (30%)",
        }
    }
}

/// One visitor's discount
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountLine {
    /// Position of the visitor in the booking
    pub visitor_index: usize,
    /// Category
    pub kind: DiscountKind,
    /// Receipt label
    pub label: String,
    /// Amount taken off
    pub amount: Money,
}

/// One addon line
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonLine {
    /// Display name
    pub name: String,
    /// Unit price
    pub unit_price: Money,
    /// Units
    pub quantity: u32,
    /// `unit_price × quantity`
    pub amount: Money,
}

/// One tax line
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxLine {
    /// Tax name
    pub name: String,
    /// Rate in basis points
    pub rate_bps: u32,
    /// Amount charged
    pub amount: Money,
}

/// Itemized price of a booking
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    /// Price per visitor
    pub base_price: Money,
    /// Visitors priced
    pub visitor_count: u32,
    /// `base_price × visitor_count`
    pub subtotal: Money,
    /// Discount lines, in visitor order
    pub discounts: Vec<DiscountLine>,
    /// Sum of discounts
    pub discount_total: Money,
    /// Addon lines
    pub addons: Vec<AddonLine>,
    /// Sum of addons
    pub addon_total: Money,
    /// `subtotal − discount_total + addon_total`
    pub taxable_amount: Money,
    /// Tax lines
    pub taxes: Vec<TaxLine>,
    /// Sum of taxes
    pub tax_total: Money,
    /// Amount payable
    pub total: Money,
}

/// Calculator configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingPolicy {
    /// Tax name on the receipt
    pub tax_name: String,
    /// Tax rate in basis points
    pub tax_bps: u32,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            tax_name: "GST".to_string(),
            tax_bps: DEFAULT_TAX_BPS,
        }
    }
}

impl PricingPolicy {
    /// Price a booking.
    ///
    /// # Errors
    ///
    /// [`PricingError::NoVisitors`] for an empty list, [`PricingError::NegativeAge`]
    /// for a negative age, [`PricingError::Overflow`] when amounts do not fit.
    pub fn quote(
        &self,
        base_price: Money,
        visitors: &[Visitor],
        addons: &[AddonItem],
    ) -> Result<PriceBreakdown, PricingError> {
        if visitors.is_empty() {
            return Err(PricingError::NoVisitors);
        }
        if let Some((index, visitor)) = visitors.iter().enumerate().find(|(_, v)| v.age < 0) {
            return Err(PricingError::NegativeAge { index, age: visitor.age });
        }

        let visitor_count = u32::try_from(visitors.len()).map_err(|_| PricingError::Overflow)?;
        let subtotal = base_price
            .checked_mul(u64::from(visitor_count))
            .ok_or(PricingError::Overflow)?;

        let discounts: Vec<DiscountLine> = visitors
            .iter()
            .enumerate()
            .filter_map(|(visitor_index, visitor)| {
                DiscountKind::for_age(visitor.age).map(|kind| DiscountLine {
                    visitor_index,
                    kind,
                    label: kind.label().to_string(),
                    amount: base_price.percent_bps(kind.rate_bps()),
                })
            })
            .collect();
        let discount_total =
            Money::checked_sum(discounts.iter().map(|d| d.amount)).ok_or(PricingError::Overflow)?;

        let addons = addons
            .iter()
            .map(|item| {
                item.price
                    .checked_mul(u64::from(item.quantity))
                    .map(|amount| AddonLine {
                        name: item.name.clone(),
                        unit_price: item.price,
                        quantity: item.quantity,
                        amount,
                    })
                    .ok_or(PricingError::Overflow)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let addon_total =
            Money::checked_sum(addons.iter().map(|a| a.amount)).ok_or(PricingError::Overflow)?;

        // Each discount is at most the base price, so this cannot underflow.
        let taxable_amount = subtotal
            .checked_sub(discount_total)
            .and_then(|net| net.checked_add(addon_total))
            .ok_or(PricingError::Overflow)?;

        let tax = TaxLine {
            name: self.tax_name.clone(),
            rate_bps: self.tax_bps,
            amount: taxable_amount.percent_bps(self.tax_bps),
        };
        let tax_total = tax.amount;
        let total = taxable_amount
            .checked_add(tax_total)
            .ok_or(PricingError::Overflow)?;

        Ok(PriceBreakdown {
            base_price,
            visitor_count,
            subtotal,
            discounts,
            discount_total,
            addons,
            addon_total,
            taxable_amount,
            taxes: vec![tax],
            tax_total,
            total,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn visitor(age: i32) -> Visitor {
        Visitor::new("Test Visitor", age, "Indian")
    }

    fn fifty() -> Money {
        Money::from_major(50).unwrap()
    }

    #[test]
    fn student_and_senior_example() {
        let quote = PricingPolicy::default()
            .quote(fifty(), &[visitor(15), visitor(65)], &[])
            .unwrap();

        assert_eq!(quote.subtotal, Money::from_minor(10_000));
        assert_eq!(quote.discounts.len(), 2);
        assert_eq!(quote.discounts[0].kind, DiscountKind::Student);
        assert_eq!(quote.discounts[0].amount, Money::from_minor(2_500));
        assert_eq!(quote.discounts[1].kind, DiscountKind::Senior);
        assert_eq!(quote.discounts[1].amount, Money::from_minor(1_500));
        assert_eq!(quote.taxable_amount, Money::from_minor(6_000));
        assert_eq!(quote.taxes[0].amount, Money::from_minor(1_080));
        assert_eq!(quote.total, Money::from_minor(7_080));
        assert_eq!(quote.total.to_string(), "70.80");
    }

    #[test]
    fn discount_boundaries() {
        assert_eq!(DiscountKind::for_age(17), Some(DiscountKind::Student));
        assert_eq!(DiscountKind::for_age(18), None);
        assert_eq!(DiscountKind::for_age(59), None);
        assert_eq!(DiscountKind::for_age(60), Some(DiscountKind::Senior));
        assert_eq!(DiscountKind::for_age(0), Some(DiscountKind::Student));
    }

    #[test]
    fn addons_are_taxed() {
        let addons = [AddonItem {
            name: "Audio guide".to_string(),
            price: Money::from_minor(1_000),
            quantity: 2,
        }];
        let quote = PricingPolicy::default()
            .quote(fifty(), &[visitor(30)], &addons)
            .unwrap();

        assert_eq!(quote.addon_total, Money::from_minor(2_000));
        assert_eq!(quote.taxable_amount, Money::from_minor(7_000));
        assert_eq!(quote.tax_total, Money::from_minor(1_260));
        assert_eq!(quote.total, Money::from_minor(8_260));
        assert!(quote.discounts.is_empty());
    }

    #[test]
    fn rejects_empty_visitor_list() {
        assert_eq!(
            PricingPolicy::default().quote(fifty(), &[], &[]),
            Err(PricingError::NoVisitors)
        );
    }

    #[test]
    fn rejects_negative_age() {
        assert_eq!(
            PricingPolicy::default().quote(fifty(), &[visitor(30), visitor(-1)], &[]),
            Err(PricingError::NegativeAge { index: 1, age: -1 })
        );
    }

    proptest! {
        #[test]
        fn total_is_deterministic_and_consistent(
            ages in proptest::collection::vec(0i32..=120, 1..12),
            base in 0u64..1_000_000,
        ) {
            let visitors: Vec<Visitor> = ages.iter().map(|&a| visitor(a)).collect();
            let policy = PricingPolicy::default();
            let first = policy.quote(Money::from_minor(base), &visitors, &[]).unwrap();
            let second = policy.quote(Money::from_minor(base), &visitors, &[]).unwrap();

            prop_assert_eq!(&first, &second);
            prop_assert!(first.discounts.len() <= visitors.len());
            prop_assert_eq!(
                first.total.minor(),
                first.taxable_amount.minor() + first.tax_total.minor()
            );
            prop_assert_eq!(
                first.taxable_amount.minor(),
                first.subtotal.minor() - first.discount_total.minor()
            );
        }
    }
}
