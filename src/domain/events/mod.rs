//! Domain events
//!
//! Raised inside the aggregates, drained with `take_events` and published
//! fire-and-forget by the service layer (toast notifications, NATS).

use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    Cart(CartEvent),
    Product(ProductEvent),
    Order(OrderEvent),
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CartEvent {
    ItemAdded { product_id: Uuid, quantity: u32 },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProductEvent {
    Created { product_id: Uuid, farmer_id: Uuid },
    StockSet { product_id: Uuid, stock: u32 },
    SaleOpened { product_id: Uuid },
    SaleClosed { product_id: Uuid },
    Purchased { product_id: Uuid, quantity: u32, remaining: u32 },
    Restocked { product_id: Uuid, quantity: u32, stock: u32 },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Created { order_id: Uuid, customer_id: Uuid },
    Confirmed { order_id: Uuid },
    Shipped { order_id: Uuid },
    Delivered { order_id: Uuid },
    Cancelled { order_id: Uuid },
}
