//! Immutable context shared by every virtual client

use serde::{Deserialize, Serialize};

/// Credentials of one provisioned account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSession {
    /// 1-based population ordinal, 0 for the primary account
    pub ordinal: usize,
    /// Login email
    pub email: String,
    /// Bearer token from login
    #[serde(skip_serializing, default)]
    pub access_token: String,
    /// Subject claim of the token, if it could be decoded
    pub user_id: Option<String>,
}

/// Everything setup produced, read-only for the rest of the run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedContext {
    /// Identifier embedded in provisioned account names
    pub run_id: String,
    /// Account used for shared-session workloads and seeding
    pub primary: Option<UserSession>,
    /// Population slots; index `n - 1` holds ordinal `n`
    pub users: Vec<Option<UserSession>>,
    /// Catalog item created for the run
    pub product_id: Option<String>,
    /// Stock the product was created with
    pub initial_stock: Option<u32>,
    /// Orders created during setup
    pub seeded_orders: usize,
}

impl SharedContext {
    /// Context with nothing provisioned
    pub fn empty(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Default::default()
        }
    }

    /// Session for a 1-based ordinal
    pub fn user(&self, ordinal: usize) -> Option<&UserSession> {
        ordinal
            .checked_sub(1)
            .and_then(|idx| self.users.get(idx))
            .and_then(Option::as_ref)
    }

    /// Requested population size
    pub fn population(&self) -> usize {
        self.users.len()
    }

    /// Successfully provisioned sessions in ordinal order
    pub fn provisioned(&self) -> impl Iterator<Item = &UserSession> {
        self.users.iter().flatten()
    }

    /// Number of successfully provisioned sessions
    pub fn provisioned_count(&self) -> usize {
        self.provisioned().count()
    }
}
