use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{Answers, ApplicationType};
use super::registry::SubEntityRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub phone: String,
}

/// Delivered by the authentication service once the user has signed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub profile: UserProfile,
}

/// Read-only view of a finalized application, handed to offer pricing.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerSnapshot {
    pub application_type: ApplicationType,
    pub answers: Arc<Answers>,
    pub sub_entities: Arc<SubEntityRegistry>,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingQuote {
    pub monthly_payment: f64,
    pub total_repayment: f64,
    pub rate_percent: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    #[error("missing pricing input '{0}'")]
    MissingInput(&'static str),
    #[error("pricing unavailable: {0}")]
    Unavailable(String),
}

/// Seam to the external offer/amortization engine.
pub trait PricingCollaborator: Send + Sync {
    fn quote(
        &self,
        application_type: ApplicationType,
        snapshot: &AnswerSnapshot,
    ) -> Result<PricingQuote, PricingError>;
}
