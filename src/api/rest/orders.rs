use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::AppError;
use crate::models::agent::GeoPoint;
use crate::models::handoff::HandoffCode;
use crate::models::order::{
    Address, Customer, Order, OrderDetail, OrderItem, OrderStatus, Vendor,
};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", patch(update_status))
        .route("/orders/:id/handoff", post(confirm_handoff))
}

#[derive(Deserialize)]
pub struct VendorSpec {
    pub name: String,
    pub location: GeoPoint,
}

#[derive(Deserialize)]
pub struct CustomerSpec {
    pub name: String,
    pub phone: String,
}

#[derive(Deserialize)]
pub struct AddressSpec {
    pub line: String,
    pub location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct ItemSpec {
    pub name: String,
    pub quantity: u32,
    pub price: f64,
}

/// Upstream order creation. Orders arrive already grouped; the sequence
/// number fixes the delivery order within the group.
#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub vendor: VendorSpec,
    pub customer: CustomerSpec,
    pub address: AddressSpec,
    pub items: Vec<ItemSpec>,
    pub group_id: Option<Uuid>,
    pub group_seq: Option<u32>,
    pub status: Option<OrderStatus>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Deserialize)]
pub struct HandoffRequest {
    pub code: String,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<OrderDetail>, AppError> {
    if payload.items.is_empty() {
        return Err(AppError::BadRequest(
            "order must have at least one item".to_string(),
        ));
    }
    if payload.group_id.is_some() != payload.group_seq.is_some() {
        return Err(AppError::BadRequest(
            "group_id and group_seq must be set together".to_string(),
        ));
    }

    let vendor = Vendor {
        id: Uuid::new_v4(),
        name: payload.vendor.name,
        location: payload.vendor.location,
    };
    let customer = Customer {
        id: Uuid::new_v4(),
        name: payload.customer.name,
        phone: payload.customer.phone,
    };
    let address = Address {
        id: Uuid::new_v4(),
        line: payload.address.line,
        location: payload.address.location,
    };
    let items = payload
        .items
        .into_iter()
        .map(|item| OrderItem {
            id: Uuid::new_v4(),
            name: item.name,
            quantity: item.quantity,
            price: item.price,
        })
        .collect();

    let detail = OrderDetail {
        order: Order {
            id: Uuid::new_v4(),
            vendor_id: vendor.id,
            customer_id: customer.id,
            address_id: address.id,
            group_id: payload.group_id,
            group_seq: payload.group_seq,
            agent_id: None,
            status: payload.status.unwrap_or(OrderStatus::Pending),
            agent_code: HandoffCode::generate(),
            customer_code: HandoffCode::generate(),
            created_at: Utc::now(),
            delivered_at: None,
        },
        vendor,
        customer,
        address,
        items,
    };

    state.backend.insert_order(detail.clone());
    Ok(Json(detail))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderDetail>, AppError> {
    let detail = state
        .backend
        .order_detail(id, None)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", id)))?;

    Ok(Json(detail))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<OrderDetail>, AppError> {
    state.backend.update_order_status(id, payload.status).await?;

    let detail = state
        .backend
        .order_detail(id, None)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", id)))?;

    Ok(Json(detail))
}

async fn confirm_handoff(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<HandoffRequest>,
) -> Result<Json<OrderDetail>, AppError> {
    let code = HandoffCode::parse(&payload.code)
        .map_err(|err| AppError::BadRequest(err.to_string()))?;

    state.backend.confirm_handoff(id, &code).await?;

    let detail = state
        .backend
        .order_detail(id, None)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", id)))?;

    Ok(Json(detail))
}
