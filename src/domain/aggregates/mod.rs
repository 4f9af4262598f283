//! Aggregates module
pub mod cart;
pub mod order;
pub mod product;

pub use cart::{Cart, CartLine, FLAT_SHIPPING_FEE_THB, FREE_SHIPPING_THRESHOLD_THB};
pub use order::{Order, OrderError, OrderLine, OrderStatus, PaymentMethod, PaymentStatus, ShippingInfo};
pub use product::{Product, ProductError};
