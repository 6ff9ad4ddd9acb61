//! Order pricing prelude.
//!
//! Convenience exports for common library consumers.

pub use crate::{
    catalogue::{Catalogue, StaticCatalogue, VariantListing},
    discounts::{
        DiscountChanges, DiscountError, DiscountTarget, DiscountType, DiscountValueType,
        LineDiscount, OrderDiscount,
        vouchers::{Voucher, VoucherChannelListing, VoucherType},
    },
    money::{TaxedMoney, TaxedMoneyRange, percent},
    order::{
        Channel, FetchOptions, Order, OrderCalculator, OrderChanges, OrderLine, OrderStatus,
        PricingError, ProductVariantRef, ShippingMethod,
    },
    promotions::{
        PromotionRule, RewardType,
        predicate::{BoolOp, CataloguePredicate, OrderPredicate, PredicateRule},
    },
    receipt::{Receipt, ReceiptError},
    settings::{Settings, SettingsError},
    store::{InMemoryOrderStore, OrderStore, StoreError},
    tax::{
        FlatRates, NoTaxProvider, TaxCalculationStrategy, TaxConfiguration, TaxData,
        TaxDataError, TaxError, TaxLineData, TaxProvider,
    },
};
