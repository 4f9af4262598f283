//! Product aggregate
//!
//! A listing owned by one farmer. Availability is the conjunction of two
//! things: physical stock and the farmer's stated intent to sell
//! (`open_for_sale`). The rules are asymmetric on purpose: running out of
//! stock always closes the sale, but restocking never reopens it — the farmer
//! may have paused the listing for reasons other than stock.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::events::{DomainEvent, ProductEvent};
use crate::domain::value_objects::{Money, Quantity};

#[derive(Clone, Debug)]
pub struct Product {
    id: Uuid,
    farmer_id: Uuid,
    name: String,
    description: String,
    unit: String,
    category: Option<String>,
    image: Option<String>,
    organic: bool,
    discount_percent: Option<u32>,
    tags: Vec<String>,
    price: Money,
    stock: Quantity,
    open_for_sale: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    events: Vec<DomainEvent>,
}

impl Product {
    pub fn create(
        farmer_id: Uuid,
        name: impl Into<String>,
        unit: impl Into<String>,
        price: Money,
        initial_stock: u32,
    ) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut product = Self {
            id,
            farmer_id,
            name: name.into(),
            description: String::new(),
            unit: unit.into(),
            category: None,
            image: None,
            organic: false,
            discount_percent: None,
            tags: vec![],
            price,
            stock: Quantity::new(initial_stock),
            // New listings open automatically when they arrive with stock.
            open_for_sale: initial_stock > 0,
            created_at: now,
            updated_at: now,
            events: vec![],
        };
        product.raise_event(DomainEvent::Product(ProductEvent::Created {
            product_id: id,
            farmer_id,
        }));
        product
    }

    /// Rebuild an aggregate from stored state, bypassing creation events.
    #[allow(clippy::too_many_arguments)]
    pub fn from_stored(
        id: Uuid,
        farmer_id: Uuid,
        name: String,
        description: String,
        unit: String,
        category: Option<String>,
        image: Option<String>,
        organic: bool,
        discount_percent: Option<u32>,
        tags: Vec<String>,
        price: Money,
        stock: u32,
        open_for_sale: bool,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            farmer_id,
            name,
            description,
            unit,
            category,
            image,
            organic,
            discount_percent,
            tags,
            price,
            // Zero stock can never be listed as purchasable, whatever was stored.
            open_for_sale: open_for_sale && stock > 0,
            stock: Quantity::new(stock),
            created_at,
            updated_at,
            events: vec![],
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn farmer_id(&self) -> Uuid { self.farmer_id }
    pub fn name(&self) -> &str { &self.name }
    pub fn description(&self) -> &str { &self.description }
    pub fn unit(&self) -> &str { &self.unit }
    pub fn category(&self) -> Option<&str> { self.category.as_deref() }
    pub fn image(&self) -> Option<&str> { self.image.as_deref() }
    pub fn organic(&self) -> bool { self.organic }
    pub fn discount_percent(&self) -> Option<u32> { self.discount_percent }
    pub fn tags(&self) -> &[String] { &self.tags }
    pub fn price(&self) -> &Money { &self.price }
    pub fn stock(&self) -> Quantity { self.stock }
    pub fn open_for_sale(&self) -> bool { self.open_for_sale }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    /// Whether a customer may add this product to a cart right now.
    pub fn is_available(&self) -> bool {
        !self.stock.is_zero() && self.open_for_sale
    }

    /// Ownership guard applied at the call boundary of every farmer mutation.
    pub fn ensure_owned_by(&self, farmer_id: Uuid) -> Result<(), ProductError> {
        if self.farmer_id == farmer_id {
            Ok(())
        } else {
            Err(ProductError::NotOwner)
        }
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
        self.touch();
    }

    pub fn set_category(&mut self, category: Option<String>) {
        self.category = category;
        self.touch();
    }

    pub fn set_image(&mut self, image: Option<String>) {
        self.image = image;
        self.touch();
    }

    pub fn set_organic(&mut self, organic: bool) {
        self.organic = organic;
        self.touch();
    }

    pub fn set_discount_percent(&mut self, discount: Option<u32>) {
        self.discount_percent = discount.filter(|d| *d > 0);
        self.touch();
    }

    pub fn set_tags(&mut self, tags: Vec<String>) {
        self.tags = tags;
        self.touch();
    }

    pub fn update_price(&mut self, new_price: Money) {
        self.price = new_price;
        self.touch();
    }

    /// Direct stock edit by the farmer. The sale flag follows the stock count:
    /// editing to a positive count reopens the sale, editing to zero closes it.
    /// A simultaneous explicit close is applied by the caller after this, so
    /// the explicit intent wins.
    pub fn set_stock(&mut self, stock: u32) {
        self.stock = Quantity::new(stock);
        self.open_for_sale = stock > 0;
        self.raise_event(DomainEvent::Product(ProductEvent::StockSet {
            product_id: self.id,
            stock,
        }));
        self.touch();
    }

    /// Farmer opens the listing for sale. Rejected while the shelf is empty.
    pub fn open_sale(&mut self) -> Result<(), ProductError> {
        if self.stock.is_zero() {
            return Err(ProductError::CannotOpenSale);
        }
        self.open_for_sale = true;
        self.raise_event(DomainEvent::Product(ProductEvent::SaleOpened {
            product_id: self.id,
        }));
        self.touch();
        Ok(())
    }

    /// Farmer closes the listing. Always allowed.
    pub fn close_sale(&mut self) {
        self.open_for_sale = false;
        self.raise_event(DomainEvent::Product(ProductEvent::SaleClosed {
            product_id: self.id,
        }));
        self.touch();
    }

    /// Flip the sale flag: open becomes closed, closed becomes open if there
    /// is stock to sell.
    pub fn toggle_sale(&mut self) -> Result<(), ProductError> {
        if self.is_available() {
            self.close_sale();
            Ok(())
        } else {
            self.open_sale()
        }
    }

    /// Deduct stock for a confirmed order. Checked before any mutation, so a
    /// failed purchase leaves the aggregate untouched. Selling out closes the
    /// sale; a partial sale preserves the farmer's flag as-is.
    pub fn purchase(&mut self, quantity: u32) -> Result<(), ProductError> {
        let remaining = self
            .stock
            .subtract(quantity)
            .ok_or(ProductError::InsufficientStock)?;
        self.stock = remaining;
        if remaining.is_zero() {
            self.open_for_sale = false;
        }
        self.raise_event(DomainEvent::Product(ProductEvent::Purchased {
            product_id: self.id,
            quantity,
            remaining: remaining.value(),
        }));
        self.touch();
        Ok(())
    }

    /// Return stock after an order cancellation or refund. Never reopens the
    /// sale; the farmer re-opens explicitly via `toggle_sale`.
    pub fn restock(&mut self, quantity: u32) {
        self.stock = self.stock.add(quantity);
        self.raise_event(DomainEvent::Product(ProductEvent::Restocked {
            product_id: self.id,
            quantity,
            stock: self.stock.value(),
        }));
        self.touch();
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
pub enum ProductError {
    /// Attempted to open the sale with nothing on the shelf.
    #[error("Cannot open sale: product is out of stock")]
    CannotOpenSale,
    /// Purchase would drive the stock count negative.
    #[error("Insufficient stock")]
    InsufficientStock,
    /// Mutation attempted by someone other than the owning farmer.
    #[error("Not the owner of this product")]
    NotOwner,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn mango(stock: u32) -> Product {
        Product::create(
            Uuid::new_v4(),
            "Nam Dok Mai Mango",
            "kg",
            Money::thb(Decimal::new(120, 0)),
            stock,
        )
    }

    #[test]
    fn test_created_with_stock_is_available() {
        let p = mango(5);
        assert!(p.open_for_sale());
        assert!(p.is_available());
    }

    #[test]
    fn test_created_without_stock_is_unavailable() {
        let p = mango(0);
        assert!(!p.open_for_sale());
        assert!(!p.is_available());
    }

    #[test]
    fn test_toggle_with_zero_stock_fails() {
        let mut p = mango(0);
        assert_eq!(p.toggle_sale(), Err(ProductError::CannotOpenSale));
        assert!(!p.is_available());
    }

    #[test]
    fn test_toggle_closes_and_reopens() {
        let mut p = mango(3);
        p.toggle_sale().unwrap();
        assert!(!p.is_available());
        p.toggle_sale().unwrap();
        assert!(p.is_available());
    }

    #[test]
    fn test_purchase_insufficient_leaves_stock_unchanged() {
        let mut p = mango(4);
        assert_eq!(p.purchase(5), Err(ProductError::InsufficientStock));
        assert_eq!(p.stock().value(), 4);
        assert!(p.is_available());
    }

    #[test]
    fn test_sell_out_then_restock_then_toggle() {
        let mut p = mango(5);

        p.purchase(5).unwrap();
        assert_eq!(p.stock().value(), 0);
        assert!(!p.is_available());

        // Restocking alone does not relist the product.
        p.restock(3);
        assert_eq!(p.stock().value(), 3);
        assert!(!p.is_available());

        p.toggle_sale().unwrap();
        assert!(p.is_available());
    }

    #[test]
    fn test_partial_purchase_preserves_closed_flag() {
        let mut p = mango(10);
        p.close_sale();
        p.purchase(4).unwrap();
        assert_eq!(p.stock().value(), 6);
        assert!(!p.open_for_sale());
    }

    #[test]
    fn test_set_stock_auto_manages_sale_flag() {
        let mut p = mango(0);
        p.set_stock(7);
        assert!(p.is_available());
        p.set_stock(0);
        assert!(!p.is_available());
    }

    #[test]
    fn test_explicit_close_wins_over_stock_edit() {
        let mut p = mango(2);
        // The update handler applies the explicit flag after the stock edit.
        p.set_stock(9);
        p.close_sale();
        assert_eq!(p.stock().value(), 9);
        assert!(!p.is_available());
    }

    #[test]
    fn test_ownership_guard() {
        let farmer = Uuid::new_v4();
        let p = Product::create(farmer, "Jasmine Rice", "kg", Money::thb(Decimal::new(45, 0)), 20);
        assert!(p.ensure_owned_by(farmer).is_ok());
        assert_eq!(p.ensure_owned_by(Uuid::new_v4()), Err(ProductError::NotOwner));
    }

    #[test]
    fn test_stored_zero_stock_cannot_be_listed() {
        let now = Utc::now();
        let p = Product::from_stored(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "Free-range Eggs".into(),
            String::new(),
            "dozen".into(),
            None,
            None,
            false,
            None,
            vec![],
            Money::thb(Decimal::new(65, 0)),
            0,
            true,
            now,
            now,
        );
        assert!(!p.is_available());
        assert!(!p.open_for_sale());
    }
}
