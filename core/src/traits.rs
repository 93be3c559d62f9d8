//! Core traits for target clients, samplers, provisioners and workloads
//!
//! These traits are defined in core to avoid circular dependencies.
//! Implementations live in their respective crates (http/, samplers/) or in
//! core itself for the built-in template workload.

use crate::context::{SharedContext, UserSession};
use crate::outcome::RequestOutcome;
use crate::request::{PreparedRequest, RequestTemplate};
use crate::response::{RawResponse, TransportErrorKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// Target Client Trait
// ============================================================================

/// Executes rendered requests against the system under test
///
/// Failures never surface as errors: a transport failure is reported as a
/// [`RawResponse`] with [`RawStatus::Transport`](crate::response::RawStatus).
#[async_trait]
pub trait TargetClient: Send + Sync {
    /// Target identifier for logs
    fn target_name(&self) -> &str;

    /// Send the request and describe what came back
    async fn execute(&self, request: &PreparedRequest) -> RawResponse;
}

// ============================================================================
// Sampler Trait
// ============================================================================

/// Picks the next request template for a client iteration
pub trait Sampler: Send + Sync {
    /// Sampler name for identification
    fn name(&self) -> &str;

    /// Choose one template
    ///
    /// Must be callable concurrently without shared mutable draw state.
    fn sample(&self) -> Result<RequestTemplate, SamplerError>;
}

/// Sampler-specific errors
#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    /// No more templates available
    #[error("Sampler exhausted")]
    Exhausted,

    /// Invalid sampler configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

// ============================================================================
// Provisioner Trait
// ============================================================================

/// Credentials for one account to register and log in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Login email
    pub email: String,
    /// Password
    #[serde(skip_serializing, default)]
    pub password: String,
    /// Display name
    pub name: String,
}

/// Result of a successful login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGrant {
    /// Bearer token
    pub access_token: String,
    /// Subject claim of the token
    pub subject: Option<String>,
}

/// Catalog item created during setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSpec {
    /// Product name
    pub name: String,
    /// Description
    pub description: String,
    /// Price in minor units
    pub price: u64,
    /// Initial stock, the scarce resource's capacity
    pub stock: u32,
}

/// Setup-time operations against the target service
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Register an account; an already-existing account is not an error
    async fn register(&self, account: &Account) -> Result<(), ProvisionError>;

    /// Log in and obtain a bearer token
    async fn login(&self, account: &Account) -> Result<LoginGrant, ProvisionError>;

    /// Create a product, returning its id
    async fn create_product(
        &self,
        session: &UserSession,
        product: &ProductSpec,
    ) -> Result<String, ProvisionError>;

    /// Place one order for `quantity` units of a product
    async fn create_order(
        &self,
        session: &UserSession,
        product_id: &str,
        quantity: u32,
    ) -> Result<(), ProvisionError>;
}

/// Provisioning failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProvisionError {
    /// The service answered with an unexpected status
    #[error("{step} rejected with status {status}: {body}")]
    Rejected {
        /// Setup step
        step: &'static str,
        /// HTTP status
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// No status was received
    #[error("{step} failed at transport level: {}", .kind.as_str())]
    Transport {
        /// Setup step
        step: &'static str,
        /// Transport failure kind
        kind: TransportErrorKind,
    },

    /// The response could not be interpreted
    #[error("{step} returned an unusable response: {message}")]
    InvalidResponse {
        /// Setup step
        step: &'static str,
        /// Detail
        message: String,
    },
}

// ============================================================================
// Workload Trait
// ============================================================================

/// Mutable per-client state, never shared between clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSession {
    /// 1-based client ordinal
    pub ordinal: usize,
    /// Credentials bound to this client
    pub user: Option<UserSession>,
    /// Iterations started so far
    pub iteration: usize,
}

impl ClientSession {
    /// Session without credentials
    pub fn anonymous(ordinal: usize) -> Self {
        Self {
            ordinal,
            user: None,
            iteration: 0,
        }
    }
}

/// A client could not obtain the session state its workload needs
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No provisioned account for this ordinal
    #[error("no provisioned account for client {ordinal}")]
    MissingUser {
        /// Client ordinal
        ordinal: usize,
    },

    /// Workload needs the primary session but setup did not create one
    #[error("no primary session was provisioned")]
    MissingPrimary,

    /// Workload needs accounts but none were provisioned
    #[error("no accounts were provisioned")]
    NoUsers,
}

/// Body executed by every virtual client
#[async_trait]
pub trait Workload: Send + Sync {
    /// Workload name for logs
    fn name(&self) -> &str;

    /// Build the client's session from the shared context
    fn bind(&self, ctx: &SharedContext, ordinal: usize) -> Result<ClientSession, SessionError>;

    /// Run one iteration, returning one outcome per attempted request
    async fn iteration(
        &self,
        ctx: &SharedContext,
        session: &mut ClientSession,
    ) -> Vec<RequestOutcome>;
}
