//! Order aggregate
//!
//! A checkout snapshot of the cart plus the delivery and payment details.
//! Totals are frozen at creation with the same shipping rule the cart uses;
//! the cart itself is cleared by the caller once the order is persisted.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::cart::{Cart, FLAT_SHIPPING_FEE_THB, FREE_SHIPPING_THRESHOLD_THB};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::Money;

#[derive(Clone, Debug)]
pub struct Order {
    id: Uuid,
    order_number: String,
    customer_id: Uuid,
    status: OrderStatus,
    payment_method: PaymentMethod,
    payment_status: PaymentStatus,
    lines: Vec<OrderLine>,
    subtotal: Money,
    shipping_fee: Money,
    discount: Money,
    shipping: ShippingInfo,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    shipped_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    events: Vec<DomainEvent>,
}

/// Frozen copy of a cart line at checkout time.
#[derive(Clone, Debug)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub farmer_id: Uuid,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub total: Money,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ShippingInfo {
    pub full_name: String,
    pub phone: String,
    pub address: String,
    pub district: String,
    pub province: String,
    pub postal_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    PendingPayment,
    Confirmed,
    Preparing,
    Shipping,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Confirmed => "confirmed",
            Self::Preparing => "preparing",
            Self::Shipping => "shipping",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    BankTransfer,
    #[default]
    Cod,
    Wallet,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreditCard => "credit_card",
            Self::BankTransfer => "bank_transfer",
            Self::Cod => "cod",
            Self::Wallet => "wallet",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

impl Order {
    /// Snapshot a non-empty cart into a new pending order.
    pub fn from_cart(
        order_number: impl Into<String>,
        customer_id: Uuid,
        cart: &Cart,
        shipping: ShippingInfo,
        payment_method: PaymentMethod,
    ) -> Result<Self, OrderError> {
        if cart.is_empty() {
            return Err(OrderError::EmptyCart);
        }

        let currency = cart.currency().to_string();
        let lines: Vec<OrderLine> = cart
            .lines()
            .iter()
            .map(|l| OrderLine {
                product_id: l.product_id,
                farmer_id: l.farmer_id,
                name: l.name.clone(),
                quantity: l.quantity,
                unit_price: l.unit_price.clone(),
                total: l.line_total(),
            })
            .collect();

        let subtotal = cart.subtotal();
        let shipping_fee = cart.shipping_fee();
        debug_assert_eq!(
            shipping_fee.amount(),
            if subtotal.amount() >= Decimal::from(FREE_SHIPPING_THRESHOLD_THB) {
                Decimal::ZERO
            } else {
                Decimal::from(FLAT_SHIPPING_FEE_THB)
            }
        );

        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut order = Self {
            id,
            order_number: order_number.into(),
            customer_id,
            status: OrderStatus::PendingPayment,
            payment_method,
            payment_status: PaymentStatus::Pending,
            lines,
            subtotal,
            shipping_fee,
            discount: Money::zero(&currency),
            shipping,
            notes: None,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            shipped_at: None,
            delivered_at: None,
            events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Created {
            order_id: id,
            customer_id,
        }));
        Ok(order)
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_number(&self) -> &str { &self.order_number }
    pub fn customer_id(&self) -> Uuid { self.customer_id }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment_method(&self) -> PaymentMethod { self.payment_method }
    pub fn payment_status(&self) -> PaymentStatus { self.payment_status }
    pub fn lines(&self) -> &[OrderLine] { &self.lines }
    pub fn subtotal(&self) -> &Money { &self.subtotal }
    pub fn shipping_fee(&self) -> &Money { &self.shipping_fee }
    pub fn discount(&self) -> &Money { &self.discount }
    pub fn shipping(&self) -> &ShippingInfo { &self.shipping }
    pub fn notes(&self) -> Option<&str> { self.notes.as_deref() }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> { self.confirmed_at }
    pub fn shipped_at(&self) -> Option<DateTime<Utc>> { self.shipped_at }
    pub fn delivered_at(&self) -> Option<DateTime<Utc>> { self.delivered_at }

    /// Amount charged at checkout: subtotal + shipping - discount.
    pub fn final_amount(&self) -> Money {
        Money::new(
            self.subtotal.amount() + self.shipping_fee.amount() - self.discount.amount(),
            self.subtotal.currency(),
        )
    }

    pub fn set_notes(&mut self, notes: Option<String>) {
        self.notes = notes;
        self.touch();
    }

    /// Record a completed payment and confirm the order. Confirmation is the
    /// point where stock is deducted, so the caller runs `purchase` for each
    /// line in the same transaction.
    pub fn mark_paid(&mut self) {
        self.payment_status = PaymentStatus::Completed;
        self.touch();
    }

    pub fn confirm(&mut self) -> Result<(), OrderError> {
        if self.status != OrderStatus::PendingPayment {
            return Err(OrderError::InvalidTransition(self.status, OrderStatus::Confirmed));
        }
        self.status = OrderStatus::Confirmed;
        self.confirmed_at = Some(Utc::now());
        self.raise_event(DomainEvent::Order(OrderEvent::Confirmed { order_id: self.id }));
        self.touch();
        Ok(())
    }

    pub fn start_preparing(&mut self) {
        self.status = OrderStatus::Preparing;
        self.touch();
    }

    pub fn ship(&mut self) {
        self.status = OrderStatus::Shipping;
        self.shipped_at = Some(Utc::now());
        self.raise_event(DomainEvent::Order(OrderEvent::Shipped { order_id: self.id }));
        self.touch();
    }

    pub fn deliver(&mut self) {
        self.status = OrderStatus::Delivered;
        self.delivered_at = Some(Utc::now());
        self.raise_event(DomainEvent::Order(OrderEvent::Delivered { order_id: self.id }));
        self.touch();
    }

    /// Cancel the order. The caller restocks every line afterwards; the sale
    /// flag on those products stays wherever the farmer left it.
    pub fn cancel(&mut self) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded => {
                Err(OrderError::InvalidTransition(self.status, OrderStatus::Cancelled))
            }
            _ => {
                self.status = OrderStatus::Cancelled;
                self.raise_event(DomainEvent::Order(OrderEvent::Cancelled { order_id: self.id }));
                self.touch();
                Ok(())
            }
        }
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

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// Checkout attempted on an empty cart.
    #[error("Cannot create an order from an empty cart")]
    EmptyCart,
    #[error("Invalid order transition: {0:?} -> {1:?}")]
    InvalidTransition(OrderStatus, OrderStatus),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::cart::CartLine;

    fn cart_with_line(price_thb: i64, quantity: u32) -> Cart {
        let mut cart = Cart::for_session("sess-1");
        cart.add_line(CartLine {
            product_id: Uuid::new_v4(),
            farmer_id: Uuid::new_v4(),
            name: "Organic Kale".into(),
            unit: "bunch".into(),
            image: None,
            unit_price: Money::thb(Decimal::new(price_thb, 0)),
            quantity,
            stock_ceiling: 100,
        });
        cart
    }

    fn shipping() -> ShippingInfo {
        ShippingInfo {
            full_name: "Somchai J.".into(),
            phone: "0812345678".into(),
            address: "99 Moo 4".into(),
            district: "Mueang".into(),
            province: "Chiang Mai".into(),
            postal_code: "50000".into(),
            notes: None,
        }
    }

    #[test]
    fn test_empty_cart_rejected() {
        let cart = Cart::for_session("sess-1");
        let result = Order::from_cart("ORD-1", Uuid::new_v4(), &cart, shipping(), PaymentMethod::Cod);
        assert!(matches!(result, Err(OrderError::EmptyCart)));
    }

    #[test]
    fn test_snapshot_freezes_totals() {
        let cart = cart_with_line(150, 2);
        let order =
            Order::from_cart("ORD-2", Uuid::new_v4(), &cart, shipping(), PaymentMethod::Cod).unwrap();

        assert_eq!(order.lines().len(), 1);
        assert_eq!(order.subtotal().amount(), Decimal::new(300, 0));
        assert_eq!(order.shipping_fee().amount(), Decimal::new(50, 0));
        assert_eq!(order.final_amount().amount(), Decimal::new(350, 0));
    }

    #[test]
    fn test_free_shipping_snapshot() {
        let cart = cart_with_line(250, 2);
        let order =
            Order::from_cart("ORD-3", Uuid::new_v4(), &cart, shipping(), PaymentMethod::Wallet)
                .unwrap();
        assert_eq!(order.shipping_fee().amount(), Decimal::ZERO);
        assert_eq!(order.final_amount().amount(), Decimal::new(500, 0));
    }

    #[test]
    fn test_lifecycle_to_delivery() {
        let cart = cart_with_line(100, 1);
        let mut order =
            Order::from_cart("ORD-4", Uuid::new_v4(), &cart, shipping(), PaymentMethod::Cod)
                .unwrap();

        order.mark_paid();
        order.confirm().unwrap();
        assert_eq!(order.status(), OrderStatus::Confirmed);
        assert!(order.confirmed_at().is_some());

        order.ship();
        order.deliver();
        assert_eq!(order.status(), OrderStatus::Delivered);

        // Delivered orders cannot be cancelled.
        assert!(order.cancel().is_err());
    }

    #[test]
    fn test_cancel_before_delivery() {
        let cart = cart_with_line(100, 1);
        let mut order =
            Order::from_cart("ORD-5", Uuid::new_v4(), &cart, shipping(), PaymentMethod::Cod)
                .unwrap();
        order.mark_paid();
        order.confirm().unwrap();
        order.cancel().unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);
        // Cancelling twice is rejected.
        assert!(order.cancel().is_err());
    }

    #[test]
    fn test_confirm_requires_pending_payment() {
        let cart = cart_with_line(100, 1);
        let mut order =
            Order::from_cart("ORD-6", Uuid::new_v4(), &cart, shipping(), PaymentMethod::Cod)
                .unwrap();
        order.confirm().unwrap();
        assert!(order.confirm().is_err());
    }
}
