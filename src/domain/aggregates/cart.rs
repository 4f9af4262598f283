//! Cart ledger
//!
//! In-memory, per-session record of what the customer intends to buy. Lines
//! carry a snapshot of the product's stock at add-time (`stock_ceiling`);
//! quantities are clamped to it rather than rejected, and all totals are
//! derived reads recomputed on demand. Mutations never fail.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::events::{CartEvent, DomainEvent};
use crate::domain::value_objects::Money;

/// Orders at or above this subtotal (THB) ship for free.
pub const FREE_SHIPPING_THRESHOLD_THB: i64 = 500;
/// Flat delivery fee (THB) below the free-shipping threshold.
pub const FLAT_SHIPPING_FEE_THB: i64 = 50;

#[derive(Clone, Debug)]
pub struct Cart {
    id: String,
    customer_id: Option<Uuid>,
    session_id: Option<String>,
    lines: Vec<CartLine>,
    currency: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    events: Vec<DomainEvent>,
}

/// One product held in the cart.
#[derive(Clone, Debug)]
pub struct CartLine {
    pub product_id: Uuid,
    pub farmer_id: Uuid,
    pub name: String,
    pub unit: String,
    pub image: Option<String>,
    pub unit_price: Money,
    pub quantity: u32,
    /// Stock snapshot taken when the line was created; not live-updated.
    pub stock_ceiling: u32,
}

impl CartLine {
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

impl Cart {
    pub fn new(currency: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            customer_id: None,
            session_id: None,
            lines: vec![],
            currency: currency.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            events: vec![],
        }
    }

    pub fn for_session(session_id: impl Into<String>) -> Self {
        let mut cart = Self::new("THB");
        cart.session_id = Some(session_id.into());
        cart
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn customer_id(&self) -> Option<Uuid> { self.customer_id }
    pub fn session_id(&self) -> Option<&str> { self.session_id.as_deref() }
    pub fn lines(&self) -> &[CartLine] { &self.lines }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn assign_customer(&mut self, customer_id: Uuid) {
        self.customer_id = Some(customer_id);
        self.touch();
    }

    /// Add a product to the cart. Merges into the existing line for the same
    /// product, clamping the quantity to the line's stock ceiling. Requesting
    /// more than is in stock is not an error; the quantity silently caps.
    pub fn add_line(&mut self, line: CartLine) {
        let product_id = line.product_id;
        let requested = line.quantity;

        if let Some(existing) = self.lines.iter_mut().find(|l| l.product_id == product_id) {
            existing.quantity = existing
                .quantity
                .saturating_add(requested)
                .min(existing.stock_ceiling);
        } else {
            let mut line = line;
            line.quantity = requested.min(line.stock_ceiling);
            if line.quantity == 0 {
                // Nothing to hold: zero requested or zero stock snapshot.
                return;
            }
            self.lines.push(line);
        }

        self.raise_event(DomainEvent::Cart(CartEvent::ItemAdded {
            product_id,
            quantity: requested,
        }));
        self.touch();
    }

    /// Remove a line unconditionally. No-op when the product is not in the cart.
    pub fn remove_line(&mut self, product_id: Uuid) {
        self.lines.retain(|l| l.product_id != product_id);
        self.touch();
    }

    /// Set the quantity of an existing line. Zero or negative removes the line;
    /// anything above the stock ceiling clamps to it. No-op for unknown products.
    pub fn set_quantity(&mut self, product_id: Uuid, quantity: i64) {
        if quantity <= 0 {
            self.remove_line(product_id);
            return;
        }
        if let Some(line) = self.lines.iter_mut().find(|l| l.product_id == product_id) {
            line.quantity = quantity.min(i64::from(line.stock_ceiling)) as u32;
            self.touch();
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.touch();
    }

    /// Sum of line totals.
    pub fn subtotal(&self) -> Money {
        let amount: Decimal = self
            .lines
            .iter()
            .map(|l| l.unit_price.amount() * Decimal::from(l.quantity))
            .sum();
        Money::new(amount, &self.currency)
    }

    /// Total number of units across all lines (cart badge count).
    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Flat-fee shipping, waived at the free-shipping threshold.
    pub fn shipping_fee(&self) -> Money {
        let fee = if self.subtotal().amount() >= Decimal::from(FREE_SHIPPING_THRESHOLD_THB) {
            Decimal::ZERO
        } else {
            Decimal::from(FLAT_SHIPPING_FEE_THB)
        };
        Money::new(fee, &self.currency)
    }

    /// Subtotal plus shipping fee: the amount charged at checkout.
    pub fn grand_total(&self) -> Money {
        Money::new(
            self.subtotal().amount() + self.shipping_fee().amount(),
            &self.currency,
        )
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    fn raise_event(&mut self, e: DomainEvent) {
        self.events.push(e);
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product_id: Uuid, price_thb: i64, quantity: u32, ceiling: u32) -> CartLine {
        CartLine {
            product_id,
            farmer_id: Uuid::new_v4(),
            name: "Organic Mango".into(),
            unit: "kg".into(),
            image: None,
            unit_price: Money::thb(Decimal::new(price_thb, 0)),
            quantity,
            stock_ceiling: ceiling,
        }
    }

    #[test]
    fn test_totals_track_mutations() {
        let mut cart = Cart::for_session("sess-1");
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        cart.add_line(line(a, 120, 2, 10));
        cart.add_line(line(b, 80, 1, 5));
        assert_eq!(cart.item_count(), 3);
        assert_eq!(cart.subtotal().amount(), Decimal::new(320, 0));

        cart.set_quantity(b, 3);
        assert_eq!(cart.item_count(), 5);
        assert_eq!(cart.subtotal().amount(), Decimal::new(480, 0));

        cart.remove_line(a);
        assert_eq!(cart.item_count(), 3);
        assert_eq!(cart.subtotal().amount(), Decimal::new(240, 0));
    }

    #[test]
    fn test_merge_clamps_to_stock_ceiling() {
        let mut cart = Cart::for_session("sess-1");
        let id = Uuid::new_v4();

        cart.add_line(line(id, 300, 1, 2));
        cart.add_line(line(id, 300, 1, 2));
        assert_eq!(cart.lines()[0].quantity, 2);
        assert_eq!(cart.subtotal().amount(), Decimal::new(600, 0));
        assert_eq!(cart.shipping_fee().amount(), Decimal::ZERO);
        assert_eq!(cart.grand_total().amount(), Decimal::new(600, 0));

        // Third add attempts one more unit; quantity and subtotal stay put.
        cart.add_line(line(id, 300, 1, 2));
        assert_eq!(cart.lines()[0].quantity, 2);
        assert_eq!(cart.subtotal().amount(), Decimal::new(600, 0));
    }

    #[test]
    fn test_oversized_first_add_clamps() {
        let mut cart = Cart::for_session("sess-1");
        let id = Uuid::new_v4();

        cart.add_line(line(id, 10, 100, 10));
        assert_eq!(cart.lines()[0].quantity, 10);
    }

    #[test]
    fn test_set_quantity_zero_or_negative_removes_line() {
        let mut cart = Cart::for_session("sess-1");
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        cart.add_line(line(a, 50, 2, 10));
        cart.add_line(line(b, 50, 2, 10));

        cart.set_quantity(a, 0);
        assert!(!cart.lines().iter().any(|l| l.product_id == a));

        cart.set_quantity(b, -5);
        assert!(cart.is_empty());
    }

    #[test]
    fn test_set_quantity_clamps_to_ceiling() {
        let mut cart = Cart::for_session("sess-1");
        let id = Uuid::new_v4();

        cart.add_line(line(id, 50, 1, 4));
        cart.set_quantity(id, 99);
        assert_eq!(cart.lines()[0].quantity, 4);
    }

    #[test]
    fn test_shipping_fee_boundary() {
        let mut cart = Cart::for_session("sess-1");
        let id = Uuid::new_v4();

        // 499.99 THB: below the threshold, flat fee applies.
        cart.add_line(CartLine {
            unit_price: Money::thb(Decimal::new(49_999, 2)),
            ..line(id, 0, 1, 10)
        });
        assert_eq!(cart.shipping_fee().amount(), Decimal::new(50, 0));
        assert_eq!(cart.grand_total().amount(), Decimal::new(54_999, 2));

        // Exactly 500 THB ships free.
        cart.set_quantity(id, 0);
        cart.add_line(CartLine {
            unit_price: Money::thb(Decimal::new(500, 0)),
            ..line(id, 0, 1, 10)
        });
        assert_eq!(cart.shipping_fee().amount(), Decimal::ZERO);
        assert_eq!(cart.grand_total().amount(), Decimal::new(500, 0));
    }

    #[test]
    fn test_remove_missing_line_is_noop() {
        let mut cart = Cart::for_session("sess-1");
        cart.remove_line(Uuid::new_v4());
        assert!(cart.is_empty());
    }

    #[test]
    fn test_clear_empties_ledger() {
        let mut cart = Cart::for_session("sess-1");
        cart.add_line(line(Uuid::new_v4(), 100, 2, 10));
        cart.clear();
        assert!(cart.is_empty());
        assert_eq!(cart.item_count(), 0);
        assert_eq!(cart.subtotal().amount(), Decimal::ZERO);
    }

    #[test]
    fn test_add_raises_item_added_event() {
        let mut cart = Cart::for_session("sess-1");
        let id = Uuid::new_v4();
        cart.add_line(line(id, 100, 1, 10));

        let events = cart.take_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            DomainEvent::Cart(CartEvent::ItemAdded { product_id, quantity: 1 }) if product_id == id
        ));
        assert!(cart.take_events().is_empty());
    }
}
