//! Farm2Hand Marketplace - Self-hosted farm-to-customer storefront service

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use validator::Validate;

use farm2hand::domain::aggregates::{
    Cart, CartLine, Order, OrderStatus, PaymentMethod, Product, ShippingInfo,
};
use farm2hand::domain::events::DomainEvent;
use farm2hand::domain::value_objects::Money;
use farm2hand::MarketError;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProductRow {
    pub id: Uuid,
    pub farmer_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub unit: String,
    pub category: Option<String>,
    pub image: Option<String>,
    pub organic: bool,
    pub discount_percent: Option<i32>,
    pub tags: Vec<String>,
    pub price: Decimal,
    pub currency: String,
    pub stock: i32,
    pub in_stock: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OrderRow {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub status: String,
    pub payment_method: String,
    pub payment_status: String,
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub discount: Decimal,
    pub final_amount: Decimal,
    pub currency: String,
    pub full_name: String,
    pub phone: String,
    pub address: String,
    pub district: String,
    pub province: String,
    pub postal_code: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OrderItemRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub farmer_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total: Decimal,
}

/// Session carts live in process memory only; they are never persisted and
/// die with the service (matching the single-tab cart of the original UI).
#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub nats: Option<async_nats::Client>,
    pub carts: Arc<RwLock<HashMap<String, Cart>>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&std::env::var("DATABASE_URL")?)
        .await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match std::env::var("NATS_URL") {
        Ok(url) => async_nats::connect(&url).await.ok(),
        Err(_) => None,
    };
    let state = AppState { db, nats, carts: Arc::new(RwLock::new(HashMap::new())) };

    let app = Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "farm2hand"})) }))
        .route("/api/v1/products", get(list_products).post(create_product))
        .route("/api/v1/products/:id", get(get_product).put(update_product).delete(delete_product))
        .route("/api/v1/products/:id/toggle", post(toggle_product))
        .route("/api/v1/cart/:session", get(get_cart).post(add_to_cart).delete(clear_cart))
        .route("/api/v1/cart/:session/items/:product_id", put(update_cart_item).delete(remove_cart_item))
        .route("/api/v1/checkout", post(checkout))
        .route("/api/v1/orders", get(list_orders))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/orders/:id/status", post(update_order_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8083".to_string());
    tracing::info!("Farm2Hand marketplace listening on 0.0.0.0:{}", port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?, app).await?;
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

type ApiError = (StatusCode, String);

fn internal<E: std::fmt::Display>(e: E) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn market_error(e: MarketError) -> ApiError {
    let code = match &e {
        MarketError::ProductNotFound | MarketError::OrderNotFound => StatusCode::NOT_FOUND,
        MarketError::CannotOpenSale
        | MarketError::InsufficientStock
        | MarketError::EmptyCart
        | MarketError::InvalidOrderState => StatusCode::CONFLICT,
        MarketError::NotOwner => StatusCode::FORBIDDEN,
        MarketError::InvalidQuantity => StatusCode::UNPROCESSABLE_ENTITY,
        MarketError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, e.to_string())
}

/// Fire-and-forget: failures are logged and dropped, never surfaced.
async fn publish_events(state: &AppState, events: Vec<DomainEvent>) {
    let Some(nats) = &state.nats else { return };
    for event in events {
        match serde_json::to_vec(&event) {
            Ok(payload) => {
                if let Err(e) = nats.publish("farm2hand.events".to_string(), payload.into()).await {
                    tracing::warn!("event publish failed: {}", e);
                }
            }
            Err(e) => tracing::warn!("event serialization failed: {}", e),
        }
    }
}

fn to_domain(row: &ProductRow) -> Product {
    Product::from_stored(
        row.id,
        row.farmer_id,
        row.name.clone(),
        row.description.clone().unwrap_or_default(),
        row.unit.clone(),
        row.category.clone(),
        row.image.clone(),
        row.organic,
        row.discount_percent.and_then(|d| u32::try_from(d).ok()),
        row.tags.clone(),
        Money::new(row.price, &row.currency),
        row.stock.max(0) as u32,
        row.in_stock,
        row.created_at,
        row.updated_at,
    )
}

async fn fetch_product(db: &sqlx::PgPool, id: Uuid) -> Result<ProductRow, ApiError> {
    sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await
        .map_err(internal)?
        .ok_or_else(|| market_error(MarketError::ProductNotFound))
}

async fn persist_product(db: &sqlx::PgPool, p: &Product) -> Result<ProductRow, ApiError> {
    sqlx::query_as::<_, ProductRow>(
        "UPDATE products SET name = $2, description = $3, unit = $4, category = $5, image = $6, \
         organic = $7, discount_percent = $8, tags = $9, price = $10, stock = $11, in_stock = $12, \
         updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(p.id())
    .bind(p.name())
    .bind(p.description())
    .bind(p.unit())
    .bind(p.category())
    .bind(p.image())
    .bind(p.organic())
    .bind(p.discount_percent().map(|d| d as i32))
    .bind(p.tags().to_vec())
    .bind(p.price().amount())
    .bind(p.stock().value() as i32)
    .bind(p.open_for_sale())
    .fetch_one(db)
    .await
    .map_err(internal)
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    #[serde(flatten)]
    pub row: ProductRow,
    /// Derived: stock > 0 AND the farmer keeps the sale open.
    pub available: bool,
}

impl From<ProductRow> for ProductResponse {
    fn from(row: ProductRow) -> Self {
        let available = row.stock > 0 && row.in_stock;
        Self { row, available }
    }
}

#[derive(Debug, Serialize)]
pub struct CartItemView {
    pub product_id: Uuid,
    pub farmer_id: Uuid,
    pub name: String,
    pub unit: String,
    pub image: Option<String>,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub stock_ceiling: u32,
    pub line_total: Decimal,
}

#[derive(Debug, Serialize)]
pub struct CartView {
    pub session_id: String,
    pub items: Vec<CartItemView>,
    pub item_count: u32,
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub grand_total: Decimal,
    pub currency: String,
}

fn cart_view(session: &str, cart: &Cart) -> CartView {
    CartView {
        session_id: session.to_string(),
        items: cart
            .lines()
            .iter()
            .map(|l| CartItemView {
                product_id: l.product_id,
                farmer_id: l.farmer_id,
                name: l.name.clone(),
                unit: l.unit.clone(),
                image: l.image.clone(),
                unit_price: l.unit_price.amount(),
                quantity: l.quantity,
                stock_ceiling: l.stock_ceiling,
                line_total: l.line_total().amount(),
            })
            .collect(),
        item_count: cart.item_count(),
        subtotal: cart.subtotal().amount(),
        shipping_fee: cart.shipping_fee().amount(),
        grand_total: cart.grand_total().amount(),
        currency: cart.currency().to_string(),
    }
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    #[serde(flatten)]
    pub order: OrderRow,
    pub items: Vec<OrderItemRow>,
}

// =============================================================================
// Product catalog
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub category: Option<String>,
    pub search: Option<String>,
    pub farmer_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
}

async fn list_products(
    State(s): State<AppState>,
    Query(p): Query<ListParams>,
) -> Result<Json<PaginatedResponse<ProductResponse>>, ApiError> {
    let page = p.page.unwrap_or(1).max(1);
    let per_page = p.per_page.unwrap_or(20).min(100);
    let rows = sqlx::query_as::<_, ProductRow>(
        "SELECT * FROM products \
         WHERE ($1::text IS NULL OR category = $1) \
           AND ($2::uuid IS NULL OR farmer_id = $2) \
           AND ($3::text IS NULL OR name ILIKE '%' || $3 || '%' OR description ILIKE '%' || $3 || '%') \
         ORDER BY created_at DESC LIMIT $4 OFFSET $5",
    )
    .bind(&p.category)
    .bind(p.farmer_id)
    .bind(&p.search)
    .bind(per_page as i64)
    .bind(((page - 1) * per_page) as i64)
    .fetch_all(&s.db)
    .await
    .map_err(internal)?;

    let total: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM products \
         WHERE ($1::text IS NULL OR category = $1) \
           AND ($2::uuid IS NULL OR farmer_id = $2) \
           AND ($3::text IS NULL OR name ILIKE '%' || $3 || '%' OR description ILIKE '%' || $3 || '%')",
    )
    .bind(&p.category)
    .bind(p.farmer_id)
    .bind(&p.search)
    .fetch_one(&s.db)
    .await
    .map_err(internal)?;

    Ok(Json(PaginatedResponse {
        data: rows.into_iter().map(ProductResponse::from).collect(),
        total: total.0,
        page,
    }))
}

async fn get_product(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProductResponse>, ApiError> {
    Ok(Json(fetch_product(&s.db, id).await?.into()))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    pub farmer_id: Uuid,
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 1, max = 30))]
    pub unit: String,
    pub price: Decimal,
    pub description: Option<String>,
    pub category: Option<String>,
    #[validate(url)]
    pub image: Option<String>,
    #[serde(default)]
    pub organic: bool,
    #[validate(range(min = 1, max = 90))]
    pub discount_percent: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub stock: u32,
}

async fn create_product(
    State(s): State<AppState>,
    Json(r): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductResponse>), ApiError> {
    r.validate().map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    if r.price < Decimal::ZERO {
        return Err(market_error(MarketError::InvalidQuantity));
    }

    let mut product = Product::create(r.farmer_id, r.name, r.unit, Money::thb(r.price), r.stock);
    if let Some(description) = r.description {
        product.set_description(description);
    }
    product.set_category(r.category);
    product.set_image(r.image);
    product.set_organic(r.organic);
    product.set_discount_percent(r.discount_percent);
    product.set_tags(r.tags);

    let row = sqlx::query_as::<_, ProductRow>(
        "INSERT INTO products (id, farmer_id, name, description, unit, category, image, organic, \
         discount_percent, tags, price, currency, stock, in_stock, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, NOW(), NOW()) \
         RETURNING *",
    )
    .bind(product.id())
    .bind(product.farmer_id())
    .bind(product.name())
    .bind(product.description())
    .bind(product.unit())
    .bind(product.category())
    .bind(product.image())
    .bind(product.organic())
    .bind(product.discount_percent().map(|d| d as i32))
    .bind(product.tags().to_vec())
    .bind(product.price().amount())
    .bind(product.price().currency())
    .bind(product.stock().value() as i32)
    .bind(product.open_for_sale())
    .fetch_one(&s.db)
    .await
    .map_err(internal)?;

    publish_events(&s, product.take_events()).await;
    Ok((StatusCode::CREATED, Json(row.into())))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProductRequest {
    pub farmer_id: Uuid,
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 30))]
    pub unit: Option<String>,
    pub price: Option<Decimal>,
    pub description: Option<String>,
    pub category: Option<String>,
    #[validate(url)]
    pub image: Option<String>,
    pub organic: Option<bool>,
    #[validate(range(min = 0, max = 90))]
    pub discount_percent: Option<u32>,
    pub tags: Option<Vec<String>>,
    /// Direct stock edit: auto-opens the sale when positive, closes at zero.
    pub stock: Option<u32>,
    /// Explicit sale flag. Applied after any stock edit so a close wins;
    /// opening with zero stock is rejected.
    pub in_stock: Option<bool>,
}

async fn update_product(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Json(r): Json<UpdateProductRequest>,
) -> Result<Json<ProductResponse>, ApiError> {
    r.validate().map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    let row = fetch_product(&s.db, id).await?;
    let mut product = to_domain(&row);
    product.ensure_owned_by(r.farmer_id).map_err(|e| market_error(e.into()))?;

    if let Some(price) = r.price {
        if price < Decimal::ZERO {
            return Err(market_error(MarketError::InvalidQuantity));
        }
        product.update_price(Money::thb(price));
    }
    if let Some(description) = r.description {
        product.set_description(description);
    }
    if let Some(category) = r.category {
        product.set_category(Some(category));
    }
    if let Some(image) = r.image {
        product.set_image(Some(image));
    }
    if let Some(organic) = r.organic {
        product.set_organic(organic);
    }
    if let Some(discount) = r.discount_percent {
        product.set_discount_percent(Some(discount));
    }
    if let Some(tags) = r.tags {
        product.set_tags(tags);
    }
    if let Some(stock) = r.stock {
        product.set_stock(stock);
    }
    match r.in_stock {
        Some(true) => product.open_sale().map_err(|e| market_error(e.into()))?,
        Some(false) => product.close_sale(),
        None => {}
    }

    // Name and unit are stored directly; the aggregate carries them verbatim.
    let name = r.name.as_deref().unwrap_or(row.name.as_str()).to_string();
    let unit = r.unit.as_deref().unwrap_or(row.unit.as_str()).to_string();
    let updated = sqlx::query_as::<_, ProductRow>(
        "UPDATE products SET name = $2, description = $3, unit = $4, category = $5, image = $6, \
         organic = $7, discount_percent = $8, tags = $9, price = $10, stock = $11, in_stock = $12, \
         updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(&name)
    .bind(product.description())
    .bind(&unit)
    .bind(product.category())
    .bind(product.image())
    .bind(product.organic())
    .bind(product.discount_percent().map(|d| d as i32))
    .bind(product.tags().to_vec())
    .bind(product.price().amount())
    .bind(product.stock().value() as i32)
    .bind(product.open_for_sale())
    .fetch_one(&s.db)
    .await
    .map_err(internal)?;

    publish_events(&s, product.take_events()).await;
    Ok(Json(updated.into()))
}

#[derive(Debug, Deserialize)]
pub struct OwnerRequest {
    pub farmer_id: Uuid,
}

/// Farmer toggle: open becomes closed, closed becomes open if stocked.
async fn toggle_product(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Json(r): Json<OwnerRequest>,
) -> Result<Json<ProductResponse>, ApiError> {
    let row = fetch_product(&s.db, id).await?;
    let mut product = to_domain(&row);
    product.ensure_owned_by(r.farmer_id).map_err(|e| market_error(e.into()))?;
    product.toggle_sale().map_err(|e| market_error(e.into()))?;

    let updated = persist_product(&s.db, &product).await?;
    publish_events(&s, product.take_events()).await;
    Ok(Json(updated.into()))
}

async fn delete_product(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Query(r): Query<OwnerRequest>,
) -> Result<StatusCode, ApiError> {
    let row = fetch_product(&s.db, id).await?;
    to_domain(&row).ensure_owned_by(r.farmer_id).map_err(|e| market_error(e.into()))?;

    sqlx::query("DELETE FROM products WHERE id = $1")
        .bind(id)
        .execute(&s.db)
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Session carts
// =============================================================================

async fn get_cart(
    State(s): State<AppState>,
    Path(session): Path<String>,
) -> Json<CartView> {
    let carts = s.carts.read().await;
    match carts.get(&session) {
        Some(cart) => Json(cart_view(&session, cart)),
        None => Json(cart_view(&session, &Cart::for_session(session.clone()))),
    }
}

#[derive(Debug, Deserialize)]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    pub quantity: Option<u32>,
}

async fn add_to_cart(
    State(s): State<AppState>,
    Path(session): Path<String>,
    Json(r): Json<AddToCartRequest>,
) -> Result<(StatusCode, Json<CartView>), ApiError> {
    let row = fetch_product(&s.db, r.product_id).await?;
    let product = to_domain(&row);
    if !product.is_available() {
        return Err((StatusCode::CONFLICT, "Product is not available for purchase".to_string()));
    }

    let line = CartLine {
        product_id: product.id(),
        farmer_id: product.farmer_id(),
        name: product.name().to_string(),
        unit: product.unit().to_string(),
        image: product.image().map(String::from),
        unit_price: product.price().clone(),
        quantity: r.quantity.unwrap_or(1),
        stock_ceiling: product.stock().value(),
    };

    let mut carts = s.carts.write().await;
    let cart = carts.entry(session.clone()).or_insert_with(|| Cart::for_session(session.clone()));
    cart.add_line(line);
    let events = cart.take_events();
    let view = cart_view(&session, cart);
    drop(carts);

    publish_events(&s, events).await;
    Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateCartItemRequest {
    /// Zero or negative removes the line.
    pub quantity: i64,
}

async fn update_cart_item(
    State(s): State<AppState>,
    Path((session, product_id)): Path<(String, Uuid)>,
    Json(r): Json<UpdateCartItemRequest>,
) -> Json<CartView> {
    let mut carts = s.carts.write().await;
    let cart = carts.entry(session.clone()).or_insert_with(|| Cart::for_session(session.clone()));
    cart.set_quantity(product_id, r.quantity);
    Json(cart_view(&session, cart))
}

async fn remove_cart_item(
    State(s): State<AppState>,
    Path((session, product_id)): Path<(String, Uuid)>,
) -> Json<CartView> {
    let mut carts = s.carts.write().await;
    let cart = carts.entry(session.clone()).or_insert_with(|| Cart::for_session(session.clone()));
    cart.remove_line(product_id);
    Json(cart_view(&session, cart))
}

async fn clear_cart(
    State(s): State<AppState>,
    Path(session): Path<String>,
) -> StatusCode {
    s.carts.write().await.remove(&session);
    StatusCode::NO_CONTENT
}

// =============================================================================
// Checkout and orders
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub session_id: String,
    pub customer_id: Uuid,
    pub shipping: ShippingInfo,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
}

async fn checkout(
    State(s): State<AppState>,
    Json(r): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    if r.shipping.full_name.trim().is_empty()
        || r.shipping.phone.trim().is_empty()
        || r.shipping.address.trim().is_empty()
    {
        return Err((StatusCode::UNPROCESSABLE_ENTITY, "Incomplete shipping information".to_string()));
    }

    let cart = {
        let carts = s.carts.read().await;
        carts.get(&r.session_id).cloned()
    };
    let cart = cart.ok_or_else(|| market_error(MarketError::EmptyCart))?;

    let order_number = format!("ORD-{:08}", rand::random::<u32>());
    let mut order = Order::from_cart(order_number, r.customer_id, &cart, r.shipping, r.payment_method)
        .map_err(|e| market_error(e.into()))?;
    order.set_notes(r.notes);
    order.mark_paid();
    order.confirm().map_err(|e| market_error(e.into()))?;

    // Stock is deducted with a conditional decrement inside one transaction:
    // two concurrent checkouts cannot both take the last unit. Selling out
    // closes the sale; otherwise the farmer's flag is preserved.
    let mut tx = s.db.begin().await.map_err(internal)?;
    for line in order.lines() {
        let result = sqlx::query(
            "UPDATE products SET stock = stock - $2, \
             in_stock = CASE WHEN stock - $2 = 0 THEN false ELSE in_stock END, \
             updated_at = NOW() WHERE id = $1 AND stock >= $2",
        )
        .bind(line.product_id)
        .bind(line.quantity as i32)
        .execute(&mut *tx)
        .await
        .map_err(internal)?;
        if result.rows_affected() == 0 {
            return Err((
                StatusCode::CONFLICT,
                format!("Insufficient stock for {}", line.name),
            ));
        }
    }

    sqlx::query(
        "INSERT INTO orders (id, order_number, customer_id, status, payment_method, payment_status, \
         subtotal, shipping_fee, discount, final_amount, currency, full_name, phone, address, \
         district, province, postal_code, notes, created_at, updated_at, confirmed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, NOW(), NOW(), $19)",
    )
    .bind(order.id())
    .bind(order.order_number())
    .bind(order.customer_id())
    .bind(order.status().as_str())
    .bind(order.payment_method().as_str())
    .bind(order.payment_status().as_str())
    .bind(order.subtotal().amount())
    .bind(order.shipping_fee().amount())
    .bind(order.discount().amount())
    .bind(order.final_amount().amount())
    .bind(order.subtotal().currency())
    .bind(&order.shipping().full_name)
    .bind(&order.shipping().phone)
    .bind(&order.shipping().address)
    .bind(&order.shipping().district)
    .bind(&order.shipping().province)
    .bind(&order.shipping().postal_code)
    .bind(order.notes())
    .bind(order.confirmed_at())
    .execute(&mut *tx)
    .await
    .map_err(internal)?;

    for line in order.lines() {
        sqlx::query(
            "INSERT INTO order_items (id, order_id, product_id, farmer_id, name, quantity, unit_price, total) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(Uuid::now_v7())
        .bind(order.id())
        .bind(line.product_id)
        .bind(line.farmer_id)
        .bind(&line.name)
        .bind(line.quantity as i32)
        .bind(line.unit_price.amount())
        .bind(line.total.amount())
        .execute(&mut *tx)
        .await
        .map_err(internal)?;
    }

    tx.commit().await.map_err(internal)?;

    // Checkout completion clears the session cart.
    s.carts.write().await.remove(&r.session_id);
    publish_events(&s, order.take_events()).await;

    let response = load_order(&s.db, order.id()).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Debug, Deserialize)]
pub struct OrderListParams {
    pub customer_id: Option<Uuid>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

async fn list_orders(
    State(s): State<AppState>,
    Query(p): Query<OrderListParams>,
) -> Result<Json<PaginatedResponse<OrderRow>>, ApiError> {
    let page = p.page.unwrap_or(1).max(1);
    let per_page = p.per_page.unwrap_or(20).min(100);
    let orders = sqlx::query_as::<_, OrderRow>(
        "SELECT * FROM orders WHERE ($1::uuid IS NULL OR customer_id = $1) \
         ORDER BY created_at DESC LIMIT $2 OFFSET $3",
    )
    .bind(p.customer_id)
    .bind(per_page as i64)
    .bind(((page - 1) * per_page) as i64)
    .fetch_all(&s.db)
    .await
    .map_err(internal)?;

    let total: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM orders WHERE ($1::uuid IS NULL OR customer_id = $1)")
            .bind(p.customer_id)
            .fetch_one(&s.db)
            .await
            .map_err(internal)?;

    Ok(Json(PaginatedResponse { data: orders, total: total.0, page }))
}

async fn load_order(db: &sqlx::PgPool, id: Uuid) -> Result<OrderResponse, ApiError> {
    let order = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await
        .map_err(internal)?
        .ok_or_else(|| market_error(MarketError::OrderNotFound))?;
    let items = sqlx::query_as::<_, OrderItemRow>("SELECT * FROM order_items WHERE order_id = $1")
        .bind(id)
        .fetch_all(db)
        .await
        .map_err(internal)?;
    Ok(OrderResponse { order, items })
}

async fn get_order(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ApiError> {
    Ok(Json(load_order(&s.db, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderRequest {
    pub customer_id: Uuid,
    pub reason: Option<String>,
}

/// Cancellation restores stock but never reopens a sale the farmer closed.
async fn cancel_order(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Json(r): Json<CancelOrderRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let existing = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
        .bind(id)
        .fetch_optional(&s.db)
        .await
        .map_err(internal)?
        .ok_or_else(|| market_error(MarketError::OrderNotFound))?;
    if existing.customer_id != r.customer_id {
        return Err(market_error(MarketError::NotOwner));
    }

    let mut tx = s.db.begin().await.map_err(internal)?;
    let cancelled = sqlx::query(
        "UPDATE orders SET status = 'cancelled', notes = COALESCE($2, notes), updated_at = NOW() \
         WHERE id = $1 AND status NOT IN ('delivered', 'cancelled', 'refunded')",
    )
    .bind(id)
    .bind(&r.reason)
    .execute(&mut *tx)
    .await
    .map_err(internal)?;
    if cancelled.rows_affected() == 0 {
        return Err(market_error(MarketError::InvalidOrderState));
    }

    let items = sqlx::query_as::<_, OrderItemRow>("SELECT * FROM order_items WHERE order_id = $1")
        .bind(id)
        .fetch_all(&mut *tx)
        .await
        .map_err(internal)?;
    for item in &items {
        sqlx::query("UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE id = $1")
            .bind(item.product_id)
            .bind(item.quantity)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
    }
    tx.commit().await.map_err(internal)?;

    publish_events(
        &s,
        vec![DomainEvent::Order(farm2hand::domain::events::OrderEvent::Cancelled { order_id: id })],
    )
    .await;
    load_order(&s.db, id).await.map(Json)
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub farmer_id: Uuid,
    pub status: OrderStatus,
}

/// Farmer-side fulfilment progress: preparing, shipping, delivered.
async fn update_order_status(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Json(r): Json<UpdateOrderStatusRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    if !matches!(r.status, OrderStatus::Preparing | OrderStatus::Shipping | OrderStatus::Delivered) {
        return Err((StatusCode::UNPROCESSABLE_ENTITY, "Unsupported status transition".to_string()));
    }

    let involved: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM order_items WHERE order_id = $1 AND farmer_id = $2")
            .bind(id)
            .bind(r.farmer_id)
            .fetch_one(&s.db)
            .await
            .map_err(internal)?;
    if involved.0 == 0 {
        return Err(market_error(MarketError::NotOwner));
    }

    let status = r.status.as_str();
    let updated = sqlx::query(
        "UPDATE orders SET status = $2, \
         shipped_at = CASE WHEN $2 = 'shipping' THEN NOW() ELSE shipped_at END, \
         delivered_at = CASE WHEN $2 = 'delivered' THEN NOW() ELSE delivered_at END, \
         updated_at = NOW() \
         WHERE id = $1 AND status NOT IN ('delivered', 'cancelled', 'refunded')",
    )
    .bind(id)
    .bind(status)
    .execute(&s.db)
    .await
    .map_err(internal)?;
    if updated.rows_affected() == 0 {
        return Err(market_error(MarketError::InvalidOrderState));
    }

    let event = match r.status {
        OrderStatus::Shipping => Some(farm2hand::domain::events::OrderEvent::Shipped { order_id: id }),
        OrderStatus::Delivered => Some(farm2hand::domain::events::OrderEvent::Delivered { order_id: id }),
        _ => None,
    };
    if let Some(event) = event {
        publish_events(&s, vec![DomainEvent::Order(event)]).await;
    }

    load_order(&s.db, id).await.map(Json)
}
