use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post, put};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::AppError;
use crate::models::agent::{Agent, AgentStatus, GeoPoint};
use crate::models::order::OrderDetail;
use crate::models::rating::{Rating, RatingStats};
use crate::models::tab::StatusTab;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/agents", post(create_agent).get(list_agents))
        .route("/agents/:id", get(get_agent).delete(deregister_agent))
        .route("/agents/:id/availability", patch(update_availability))
        .route("/agents/:id/location", patch(update_location))
        .route("/agents/:id/tab", put(set_tab))
        .route("/agents/:id/orders", get(list_orders))
        .route("/agents/:id/resubscribe", post(resubscribe))
        .route("/agents/:id/rating", post(create_rating).get(rating_stats))
}

#[derive(Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    pub location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub available: bool,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

#[derive(Deserialize)]
pub struct SetTabRequest {
    pub tab: StatusTab,
}

#[derive(Deserialize)]
pub struct CreateRatingRequest {
    pub customer_id: Uuid,
    pub stars: u8,
}

async fn create_agent(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateAgentRequest>,
) -> Result<Json<Agent>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    let agent = Agent {
        id: Uuid::new_v4(),
        name: payload.name,
        available: false,
        location: payload.location,
        status: AgentStatus::Verified,
        current_group: None,
        updated_at: Utc::now(),
    };

    state.backend.insert_agent(agent.clone());
    state.spawn_runtime(agent.id);

    Ok(Json(agent))
}

async fn list_agents(State(state): State<Arc<AppState>>) -> Json<Vec<Agent>> {
    Json(state.backend.list_agents())
}

async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Agent>, AppError> {
    let agent = state
        .backend
        .agent(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("agent {} not found", id)))?;

    Ok(Json(agent))
}

async fn deregister_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let runtime = state
        .remove_runtime(id)
        .ok_or_else(|| AppError::NotFound(format!("agent {} not found", id)))?;

    runtime.lock().await.shutdown();
    Ok(Json(serde_json::json!({ "stopped": true })))
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAvailabilityRequest>,
) -> Result<Json<Agent>, AppError> {
    let agent = state.backend.set_availability(id, payload.available)?;
    Ok(Json(agent))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Agent>, AppError> {
    let agent = state.backend.set_location(id, payload.location)?;
    Ok(Json(agent))
}

async fn set_tab(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetTabRequest>,
) -> Result<Json<Vec<OrderDetail>>, AppError> {
    let runtime = state
        .runtime(id)
        .ok_or_else(|| AppError::NotFound(format!("agent {} not found", id)))?;

    let runtime = runtime.lock().await;
    runtime.set_tab(payload.tab).await;
    Ok(Json(runtime.orders().await))
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<OrderDetail>>, AppError> {
    let runtime = state
        .runtime(id)
        .ok_or_else(|| AppError::NotFound(format!("agent {} not found", id)))?;

    let orders = runtime.lock().await.orders().await;
    Ok(Json(orders))
}

async fn resubscribe(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let runtime = state
        .runtime(id)
        .ok_or_else(|| AppError::NotFound(format!("agent {} not found", id)))?;

    runtime.lock().await.resubscribe().await;
    Ok(Json(serde_json::json!({ "resubscribed": true })))
}

async fn create_rating(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CreateRatingRequest>,
) -> Result<Json<Rating>, AppError> {
    state
        .backend
        .agent(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("agent {} not found", id)))?;

    let rating = Rating {
        id: Uuid::new_v4(),
        agent_id: id,
        customer_id: payload.customer_id,
        stars: payload.stars,
        created_at: Utc::now(),
    };

    state.backend.add_rating(rating.clone()).await?;
    Ok(Json(rating))
}

async fn rating_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RatingStats>, AppError> {
    Ok(Json(state.backend.rating_stats(id).await?))
}
