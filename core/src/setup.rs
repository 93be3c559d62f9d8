//! One-shot provisioning that produces the run's SharedContext
//!
//! Setup registers and logs in accounts, creates the catalog item the
//! workload contends for and optionally seeds orders. The result is either a
//! complete context or, by explicit policy, an abort or a degraded
//! zero-client run. It is never silently partial.

use crate::context::{SharedContext, UserSession};
use crate::error::{BenchError, BenchResult};
use crate::traits::{Account, ProductSpec, ProvisionError, Provisioner};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// What to do when a required provisioning step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupFailurePolicy {
    /// Fail the run before any client starts
    #[default]
    Abort,
    /// Continue with an empty context; the scheduler runs no clients
    DegradeToZeroClients,
}

/// Whether every population account must be provisioned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopulationPolicy {
    /// Any missing account is a setup failure
    #[default]
    RequireAll,
    /// Keep going with the accounts that worked; clients without one
    /// record a setup failure
    AllowPartial,
}

/// Everything setup should provision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupPlan {
    /// Embedded in account emails so runs do not collide
    pub run_id: String,
    /// Email prefix for provisioned accounts
    pub account_prefix: String,
    /// Password for every provisioned account
    #[serde(skip_serializing, default)]
    pub password: String,
    /// Per-client accounts to create (ordinals `1..=population`)
    pub population: usize,
    /// Log in a primary account for shared-session workloads
    pub shared_session: bool,
    /// Product to create with the primary account
    pub product: Option<ProductSpec>,
    /// Orders to place on the product with the primary account
    pub seed_orders: usize,
    /// Reaction to a failed required step
    pub failure_policy: SetupFailurePolicy,
    /// Tolerance for missing population accounts
    pub population_policy: PopulationPolicy,
    /// Accounts provisioned at the same time
    pub concurrency: usize,
}

impl SetupPlan {
    /// Plan that provisions nothing
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            account_prefix: "loadtest".into(),
            password: "test1234!".into(),
            population: 0,
            shared_session: false,
            product: None,
            seed_orders: 0,
            failure_policy: SetupFailurePolicy::Abort,
            population_policy: PopulationPolicy::RequireAll,
            concurrency: 10,
        }
    }

    /// Set the account email prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.account_prefix = prefix.into();
        self
    }

    /// Provision `n` per-client accounts
    pub fn with_population(mut self, n: usize) -> Self {
        self.population = n;
        self
    }

    /// Provision a primary session
    pub fn with_shared_session(mut self) -> Self {
        self.shared_session = true;
        self
    }

    /// Create a product
    pub fn with_product(mut self, product: ProductSpec) -> Self {
        self.product = Some(product);
        self
    }

    /// Seed `n` orders on the product
    pub fn with_seed_orders(mut self, n: usize) -> Self {
        self.seed_orders = n;
        self
    }

    /// Set the failure policy
    pub fn with_failure_policy(mut self, policy: SetupFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Set the population policy
    pub fn with_population_policy(mut self, policy: PopulationPolicy) -> Self {
        self.population_policy = policy;
        self
    }

    /// Set provisioning concurrency
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    fn needs_primary(&self) -> bool {
        self.shared_session || self.product.is_some() || self.seed_orders > 0
    }

    /// Account for population ordinal `n`, or the primary account for 0
    pub fn account(&self, ordinal: usize) -> Account {
        let (local, name) = if ordinal == 0 {
            ("primary".to_string(), "Load Test Primary".to_string())
        } else {
            (format!("user{ordinal}"), format!("Load Test User {ordinal}"))
        };
        Account {
            email: format!("{}_{}_{local}@test.com", self.account_prefix, self.run_id),
            password: self.password.clone(),
            name,
        }
    }
}

/// Result of setup
#[derive(Debug, Clone)]
pub enum SetupOutcome {
    /// Everything required was provisioned
    Ready(Arc<SharedContext>),
    /// Setup failed and the policy chose a zero-client run
    Degraded {
        /// Empty context
        context: Arc<SharedContext>,
        /// What failed
        reason: String,
    },
}

impl SetupOutcome {
    /// Context to hand to the scheduler
    pub fn context(&self) -> &Arc<SharedContext> {
        match self {
            SetupOutcome::Ready(context) | SetupOutcome::Degraded { context, .. } => context,
        }
    }

    /// Whether the run must start no clients
    pub fn is_degraded(&self) -> bool {
        matches!(self, SetupOutcome::Degraded { .. })
    }
}

#[derive(Debug, thiserror::Error)]
enum SetupFailure {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("{provisioned} of {requested} accounts provisioned")]
    IncompletePopulation { provisioned: usize, requested: usize },
}

/// Runs the setup plan once against a provisioner
pub struct SetupOrchestrator {
    plan: SetupPlan,
    provisioner: Arc<dyn Provisioner>,
}

impl SetupOrchestrator {
    /// Create an orchestrator for `plan`
    pub fn new(plan: SetupPlan, provisioner: Arc<dyn Provisioner>) -> Self {
        Self { plan, provisioner }
    }

    /// Provision everything; consumes the orchestrator so it runs once
    ///
    /// # Errors
    /// Returns a setup error when a required step fails and the policy is
    /// [`SetupFailurePolicy::Abort`].
    pub async fn run(self) -> BenchResult<SetupOutcome> {
        let start = Instant::now();
        tracing::info!(
            run_id = %self.plan.run_id,
            population = self.plan.population,
            product = self.plan.product.is_some(),
            seed_orders = self.plan.seed_orders,
            "Starting setup"
        );

        match self.provision().await {
            Ok(context) => {
                tracing::info!(
                    provisioned = context.provisioned_count(),
                    product_id = ?context.product_id,
                    seeded_orders = context.seeded_orders,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Setup finished"
                );
                Ok(SetupOutcome::Ready(Arc::new(context)))
            }
            Err(e) => match self.plan.failure_policy {
                SetupFailurePolicy::Abort => {
                    tracing::error!(error = %e, "Setup failed, aborting run");
                    Err(BenchError::setup(e.to_string()))
                }
                SetupFailurePolicy::DegradeToZeroClients => {
                    tracing::warn!(
                        error = %e,
                        "Setup failed, continuing with zero clients"
                    );
                    Ok(SetupOutcome::Degraded {
                        context: Arc::new(SharedContext::empty(self.plan.run_id.clone())),
                        reason: e.to_string(),
                    })
                }
            },
        }
    }

    async fn provision(&self) -> Result<SharedContext, SetupFailure> {
        let mut context = SharedContext::empty(self.plan.run_id.clone());

        if self.plan.needs_primary() {
            let primary = self.provision_user(0).await?;
            tracing::debug!(email = %primary.email, "Primary session ready");

            if let Some(product) = &self.plan.product {
                let product_id = self.provisioner.create_product(&primary, product).await?;
                tracing::info!(product_id = %product_id, stock = product.stock, "Product created");
                context.product_id = Some(product_id);
                context.initial_stock = Some(product.stock);
            }

            if let Some(product_id) = context.product_id.clone() {
                context.seeded_orders = self.seed_orders(&primary, &product_id).await;
            }
            context.primary = Some(primary);
        }

        context.users = self.provision_population().await?;
        Ok(context)
    }

    async fn provision_population(&self) -> Result<Vec<Option<UserSession>>, SetupFailure> {
        let requested = self.plan.population;
        if requested == 0 {
            return Ok(Vec::new());
        }

        let users: Vec<Option<UserSession>> = stream::iter(1..=requested)
            .map(|ordinal| async move {
                match self.provision_user(ordinal).await {
                    Ok(session) => Some(session),
                    Err(e) => {
                        tracing::warn!(ordinal, error = %e, "Account provisioning failed");
                        None
                    }
                }
            })
            .buffered(self.plan.concurrency.max(1))
            .collect()
            .await;

        let provisioned = users.iter().flatten().count();
        if provisioned < requested {
            match self.plan.population_policy {
                PopulationPolicy::RequireAll => {
                    return Err(SetupFailure::IncompletePopulation {
                        provisioned,
                        requested,
                    });
                }
                PopulationPolicy::AllowPartial => {
                    tracing::warn!(
                        provisioned,
                        requested,
                        "Continuing with a partial population"
                    );
                }
            }
        }
        Ok(users)
    }

    async fn provision_user(&self, ordinal: usize) -> Result<UserSession, ProvisionError> {
        let account = self.plan.account(ordinal);
        self.provisioner.register(&account).await?;
        let grant = self.provisioner.login(&account).await?;
        Ok(UserSession {
            ordinal,
            email: account.email,
            access_token: grant.access_token,
            user_id: grant.subject,
        })
    }

    async fn seed_orders(&self, primary: &UserSession, product_id: &str) -> usize {
        let mut created = 0;
        for n in 1..=self.plan.seed_orders {
            match self.provisioner.create_order(primary, product_id, 1).await {
                Ok(()) => created += 1,
                Err(e) => tracing::warn!(order = n, error = %e, "Seed order failed"),
            }
            if n % 10 == 0 {
                tracing::debug!(created, total = self.plan.seed_orders, "Seeding orders");
            }
        }
        created
    }
}

impl std::fmt::Debug for SetupOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupOrchestrator")
            .field("plan", &self.plan)
            .finish()
    }
}
