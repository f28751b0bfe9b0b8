use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub customer_id: Uuid,
    pub stars: u8,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatingStats {
    pub average: f64,
    pub count: usize,
}

impl RatingStats {
    /// Average rounded to one decimal place, zero when no ratings exist.
    pub fn from_ratings(ratings: &[Rating]) -> Self {
        let count = ratings.len();
        if count == 0 {
            return Self {
                average: 0.0,
                count: 0,
            };
        }

        let total: u32 = ratings.iter().map(|r| u32::from(r.stars)).sum();
        let average = (total as f64 / count as f64 * 10.0).round() / 10.0;
        Self { average, count }
    }
}
