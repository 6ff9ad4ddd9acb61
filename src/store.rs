//! Store
//!
//! Persistence port for orders and an in-memory implementation.

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::order::{Order, OrderChanges, OrderLine};

/// Persistence failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No order with this id.
    #[error("order not found: {0}")]
    NotFound(Uuid),

    /// The order was modified concurrently.
    #[error("order {0} was modified concurrently")]
    Conflict(Uuid),

    /// The backend failed; nothing was written.
    #[error("store backend failed: {0}")]
    Backend(String),
}

/// Order persistence.
///
/// `commit` is atomic: either the order, its lines and its discounts are all
/// written, or nothing is.
pub trait OrderStore<'a> {
    /// Load an order and its lines.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the order does not exist.
    fn load_order(&self, id: Uuid) -> Result<(Order<'a>, Vec<OrderLine<'a>>), StoreError>;

    /// Persist a recalculated order in one transaction.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails; nothing is persisted then.
    fn commit(
        &mut self,
        order: &Order<'a>,
        lines: &[OrderLine<'a>],
        changes: &OrderChanges,
    ) -> Result<(), StoreError>;
}

/// In-memory order store.
///
/// Commits are applied row by row like a relational backend would: only the
/// unit of work's price fields are written, deleted discount rows and lines are
/// dropped, and created or updated discount rows are upserted.
#[derive(Debug, Default, Clone)]
pub struct InMemoryOrderStore<'a> {
    orders: FxHashMap<Uuid, (Order<'a>, Vec<OrderLine<'a>>)>,
    commits: usize,
    fail_next_commit: bool,
}

impl<'a> InMemoryOrderStore<'a> {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an order without counting a commit.
    pub fn insert(&mut self, order: Order<'a>, lines: Vec<OrderLine<'a>>) {
        self.orders.insert(order.id, (order, lines));
    }

    /// Make the next commit fail with a backend error.
    pub fn fail_next_commit(&mut self) {
        self.fail_next_commit = true;
    }

    /// Number of successful commits.
    pub fn commits(&self) -> usize {
        self.commits
    }
}

impl<'a> OrderStore<'a> for InMemoryOrderStore<'a> {
    fn load_order(&self, id: Uuid) -> Result<(Order<'a>, Vec<OrderLine<'a>>), StoreError> {
        self.orders.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    fn commit(
        &mut self,
        order: &Order<'a>,
        lines: &[OrderLine<'a>],
        changes: &OrderChanges,
    ) -> Result<(), StoreError> {
        if std::mem::take(&mut self.fail_next_commit) {
            return Err(StoreError::Backend("injected failure".to_string()));
        }

        let Some((stored_order, stored_lines)) = self.orders.get(&order.id) else {
            return Err(StoreError::NotFound(order.id));
        };

        // Build the new rows aside so a conflict leaves the stored ones untouched.
        let mut next_order = stored_order.clone();
        let mut next_lines = stored_lines.clone();

        for field in changes.order_fields() {
            field.copy(order, &mut next_order);
        }
        apply_discount_rows(&mut next_order.discounts, &order.discounts, changes, |discount| {
            discount.id
        });

        next_lines.retain(|line| !changes.deletes_line(line.id));

        for line in lines {
            // Gift lines are owned by their promotion and written whole.
            if line.is_gift || changes.creates_line(line.id) {
                match next_lines.iter_mut().find(|stored| stored.id == line.id) {
                    Some(stored) => stored.clone_from(line),
                    None => next_lines.push(line.clone()),
                }
                continue;
            }

            let stored = next_lines
                .iter_mut()
                .find(|stored| stored.id == line.id)
                .ok_or(StoreError::Conflict(order.id))?;

            for field in changes.line_fields() {
                field.copy(line, stored);
            }
            apply_discount_rows(&mut stored.discounts, &line.discounts, changes, |discount| {
                discount.id
            });
        }

        self.orders.insert(order.id, (next_order, next_lines));
        self.commits += 1;

        debug!(
            order = %order.id,
            created = changes.discounts.created.len(),
            updated = changes.discounts.updated.len(),
            deleted = changes.discounts.deleted.len(),
            deleted_lines = changes.discounts.deleted_lines.len(),
            refreshed_lines = changes.refreshed_lines.len(),
            "order committed"
        );

        Ok(())
    }
}

/// Drop deleted discount rows and upsert the created or updated ones.
fn apply_discount_rows<T: Clone>(
    stored: &mut Vec<T>,
    current: &[T],
    changes: &OrderChanges,
    id: impl Fn(&T) -> Uuid,
) {
    stored.retain(|row| !changes.deletes_discount(id(row)));

    for row in current.iter().filter(|row| changes.writes_discount(id(row))) {
        match stored.iter_mut().find(|stored| id(stored) == id(row)) {
            Some(existing) => existing.clone_from(row),
            None => stored.push(row.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use rusty_money::{Money, iso::USD};
    use testresult::TestResult;

    use crate::{
        discounts::{
            DiscountChanges, DiscountTarget, DiscountType, DiscountValueType, LineDiscount,
            OrderDiscount,
        },
        order::{Channel, OrderStatus, ProductVariantRef},
        tax::TaxConfiguration,
    };

    use super::*;

    fn order() -> Order<'static> {
        Order::new(
            OrderStatus::Draft,
            Channel::new("default", TaxConfiguration::default()),
            USD,
        )
    }

    #[test]
    fn failed_commit_writes_nothing() -> TestResult {
        let order = order();
        let mut store = InMemoryOrderStore::new();
        store.insert(order.clone(), Vec::new());

        let mut changed = order.clone();
        changed.should_refresh_prices = false;

        store.fail_next_commit();
        let result = store.commit(&changed, &[], &OrderChanges::default());

        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert_eq!(store.commits(), 0);
        assert!(store.load_order(order.id)?.0.should_refresh_prices);

        store.commit(&changed, &[], &OrderChanges::default())?;
        assert!(!store.load_order(order.id)?.0.should_refresh_prices);

        Ok(())
    }

    fn line(name: &str) -> OrderLine<'static> {
        OrderLine::new(
            ProductVariantRef::new(Uuid::now_v7(), Uuid::now_v7()),
            name,
            1,
            Money::from_minor(1000, USD),
        )
    }

    #[test]
    fn commit_drops_deleted_gift_line_and_discount_rows() -> TestResult {
        let mut order = order();
        let mut gift = line("Tote");
        gift.is_gift = true;
        let gift_discount = LineDiscount::new(
            DiscountType::OrderPromotion,
            DiscountValueType::Fixed,
            Decimal::TEN,
            Money::from_minor(1000, USD),
        );
        gift.discounts.push(gift_discount.clone());
        let promotion = OrderDiscount::new(
            DiscountType::OrderPromotion,
            DiscountTarget::Subtotal,
            DiscountValueType::Fixed,
            Decimal::ONE,
            USD,
        );
        order.discounts.push(promotion.clone());
        let jacket = line("Jacket");

        let mut store = InMemoryOrderStore::new();
        store.insert(order.clone(), vec![jacket.clone(), gift.clone()]);

        let mut removed = DiscountChanges::default();
        removed.deleted.push(gift_discount.id);
        removed.deleted.push(promotion.id);
        removed.deleted_lines.push(gift.id);
        let mut changes = OrderChanges::default();
        changes.record(removed);

        order.discounts.clear();
        store.commit(&order, &[jacket.clone()], &changes)?;

        let (stored, lines) = store.load_order(order.id)?;
        assert!(stored.discounts.is_empty());
        assert_eq!(lines.len(), 1);
        assert!(lines.iter().all(|line| line.id == jacket.id && line.discounts.is_empty()));

        Ok(())
    }

    #[test]
    fn commit_writes_price_fields_and_discount_upserts_only() -> TestResult {
        let order = order();
        let stored_line = line("Jacket");
        let mut store = InMemoryOrderStore::new();
        store.insert(order.clone(), vec![stored_line.clone()]);

        let mut changed = stored_line.clone();
        changed.product_name = "Renamed".to_string();
        changed.base_unit_price = Money::from_minor(800, USD);
        let discount = LineDiscount::new(
            DiscountType::Manual,
            DiscountValueType::Fixed,
            Decimal::TWO,
            Money::from_minor(200, USD),
        );
        changed.discounts.push(discount.clone());

        let mut created = DiscountChanges::default();
        created.created.push(discount.id);
        let mut changes = OrderChanges::default();
        changes.record(created);

        store.commit(&order, &[changed], &changes)?;

        let (_, lines) = store.load_order(order.id)?;
        let line = lines.first().ok_or("missing line")?;
        assert_eq!(line.product_name, "Jacket");
        assert_eq!(line.base_unit_price, Money::from_minor(800, USD));
        assert_eq!(line.discounts, vec![discount]);

        Ok(())
    }

    #[test]
    fn commit_of_unknown_line_is_a_conflict() -> TestResult {
        let order = order();
        let mut store = InMemoryOrderStore::new();
        store.insert(order.clone(), Vec::new());

        let result = store.commit(&order, &[line("Ghost")], &OrderChanges::default());

        assert_eq!(result, Err(StoreError::Conflict(order.id)));
        assert_eq!(store.commits(), 0);

        Ok(())
    }

    #[test]
    fn unknown_orders_are_not_found() {
        let store = InMemoryOrderStore::new();
        let id = Uuid::now_v7();

        assert_eq!(store.load_order(id).err(), Some(StoreError::NotFound(id)));
    }
}
