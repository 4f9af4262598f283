//! Farm2Hand Marketplace
//!
//! Self-hosted farm-to-customer marketplace: farmers list produce, customers
//! fill a cart and check out, orders track through delivery.
//!
//! ## Features
//! - Product catalog with farmer-controlled sale toggling
//! - Stock tracking with auto-close on sell-out
//! - In-memory session carts with flat-fee/free-threshold shipping
//! - Order lifecycle from checkout to delivery or cancellation

use thiserror::Error;

pub mod domain;

use domain::aggregates::{OrderError, ProductError};

/// Crate-wide error taxonomy. Cart mutations never produce errors; clamped
/// input is a correction, not a failure.
#[derive(Error, Debug)]
pub enum MarketError {
    #[error("Product not found")]
    ProductNotFound,

    #[error("Order not found")]
    OrderNotFound,

    #[error("Cannot open sale: product is out of stock")]
    CannotOpenSale,

    #[error("Insufficient stock")]
    InsufficientStock,

    #[error("Not the owner of this product")]
    NotOwner,

    #[error("Invalid quantity")]
    InvalidQuantity,

    #[error("Cannot create an order from an empty cart")]
    EmptyCart,

    #[error("Invalid order state for this operation")]
    InvalidOrderState,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<ProductError> for MarketError {
    fn from(e: ProductError) -> Self {
        match e {
            ProductError::CannotOpenSale => Self::CannotOpenSale,
            ProductError::InsufficientStock => Self::InsufficientStock,
            ProductError::NotOwner => Self::NotOwner,
        }
    }
}

impl From<OrderError> for MarketError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::EmptyCart => Self::EmptyCart,
            OrderError::InvalidTransition(..) => Self::InvalidOrderState,
        }
    }
}

pub type Result<T> = std::result::Result<T, MarketError>;
