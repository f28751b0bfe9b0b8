use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Unverified,
    Verified,
    Blocked,
}

/// Delivery partner as read from the backend. `current_group` is None until
/// the assignment procedure binds a group to this agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub available: bool,
    pub location: Option<GeoPoint>,
    pub status: AgentStatus,
    pub current_group: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}
