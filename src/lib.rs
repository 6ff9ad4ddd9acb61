//! Order Pricing
//!
//! Order price and discount recalculation: voucher, catalogue and order
//! promotion discounts, manual discounts, base prices and taxes, recalculated
//! only when an order's prices are stale.

pub mod catalogue;
pub mod discounts;
pub mod fixtures;
pub mod logging;
pub mod money;
pub mod order;
pub mod prelude;
pub mod promotions;
pub mod receipt;
pub mod settings;
pub mod store;
pub mod tax;
