use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("User '{0}' not found")]
    UserNotFound(String),

    #[error("Bundle '{0}' not found")]
    BundleNotFound(String),

    #[error("Potion effect '{0}' not found")]
    EffectNotFound(String),

    #[error("Ledger entry '{0}' not found")]
    EntryNotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Purchase limit reached: {reason}")]
    LimitExceeded {
        reason:            LimitReason,
        next_available_at: Option<DateTime<Utc>>,
    },

    #[error("Insufficient balance: have {balance}, need {required}")]
    InsufficientBalance { balance: i64, required: i64 },

    #[error("Insufficient {entitlement}: have {available}, need {requested}")]
    InsufficientEntitlement {
        entitlement: String,
        available:   i64,
        requested:   i64,
    },

    #[error("Request '{idempotency_key}' was already processed")]
    DuplicateRequest { idempotency_key: String },

    #[error("Store contention persisted after retries")]
    TransientConflict,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why a purchase-limit check denied the purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitReason {
    AlreadyPurchased,
    WeeklyLimitReached,
    MonthlyLimitReached,
}

impl std::fmt::Display for LimitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AlreadyPurchased    => "this bundle can only be purchased once",
            Self::WeeklyLimitReached  => "already purchased this week",
            Self::MonthlyLimitReached => "already purchased this month",
        };
        f.write_str(s)
    }
}

impl LedgerError {
    /// Stable machine-readable kind, for the HTTP layer's error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserNotFound(_)                => "user_not_found",
            Self::BundleNotFound(_)              => "bundle_not_found",
            Self::EffectNotFound(_)              => "effect_not_found",
            Self::EntryNotFound(_)               => "entry_not_found",
            Self::Validation(_)                  => "validation_error",
            Self::LimitExceeded { .. }           => "limit_exceeded",
            Self::InsufficientBalance { .. }     => "insufficient_balance",
            Self::InsufficientEntitlement { .. } => "insufficient_entitlement",
            Self::DuplicateRequest { .. }        => "duplicate_request",
            Self::TransientConflict              => "transient_conflict",
            Self::Database(_) | Self::Serialization(_) | Self::Other(_) => "internal_store_error",
        }
    }

    /// True for failures worth retrying with the same arguments.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientConflict)
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
