use serde::Serialize;

use crate::mapper::Recommendation;

#[derive(Debug, Serialize)]
pub struct ClassificationResponse {
    pub filename: String,
    pub prediction: String,
    pub harvesting_suggestion: Recommendation,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
