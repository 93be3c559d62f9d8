//! Built-in workload: sample a template, render it, send it, classify it

use crate::context::SharedContext;
use crate::outcome::{OutcomeClassifier, RequestOutcome};
use crate::request::{RequestTemplate, TemplateVars};
use crate::traits::{ClientSession, Sampler, SessionError, TargetClient, Workload};

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Which provisioned credentials a client binds to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionBinding {
    /// No credentials
    #[default]
    Anonymous,
    /// Every client uses the primary session
    Shared,
    /// Client `n` uses population account `n`; a missing account is fatal
    /// for that client
    PerOrdinal,
    /// Clients cycle through the provisioned accounts
    RoundRobin,
}

/// Workload driven by a [`Sampler`] of request templates
///
/// Each iteration issues exactly one request. Placeholders available to
/// templates: `run_id`, `ordinal`, `iteration`, `unique_id`, `product_id`,
/// `user_id`, `random_page` (1-10), `random_price` (1000-100000),
/// `random_stock` (1-1000), plus any extras set with [`with_var`](Self::with_var).
pub struct TemplateWorkload {
    name: String,
    sampler: Arc<dyn Sampler>,
    target: Arc<dyn TargetClient>,
    classifier: Arc<OutcomeClassifier>,
    binding: SessionBinding,
    extra_vars: TemplateVars,
}

impl TemplateWorkload {
    /// Create an anonymous workload with the default classifier
    pub fn new(
        name: impl Into<String>,
        sampler: Arc<dyn Sampler>,
        target: Arc<dyn TargetClient>,
    ) -> Self {
        Self {
            name: name.into(),
            sampler,
            target,
            classifier: Arc::new(OutcomeClassifier::default()),
            binding: SessionBinding::Anonymous,
            extra_vars: TemplateVars::new(),
        }
    }

    /// Set the session binding
    pub fn with_binding(mut self, binding: SessionBinding) -> Self {
        self.binding = binding;
        self
    }

    /// Set the classifier
    pub fn with_classifier(mut self, classifier: Arc<OutcomeClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Add a static template variable
    pub fn with_var(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.extra_vars.set(key, value);
        self
    }

    fn vars_for(&self, ctx: &SharedContext, session: &ClientSession) -> TemplateVars {
        let mut rng = rand::thread_rng();
        let mut vars = TemplateVars::new()
            .with("run_id", &ctx.run_id)
            .with("ordinal", session.ordinal)
            .with("iteration", session.iteration)
            .with(
                "unique_id",
                format!("{}-{}-{}", ctx.run_id, session.ordinal, session.iteration),
            )
            .with_number("random_page", rng.gen_range(1..=10))
            .with_number("random_price", rng.gen_range(1_000..=100_000))
            .with_number("random_stock", rng.gen_range(1..=1_000));
        if let Some(product_id) = &ctx.product_id {
            vars.set("product_id", product_id);
        }
        if let Some(user_id) = session.user.as_ref().and_then(|u| u.user_id.as_ref()) {
            vars.set("user_id", user_id);
        }
        vars.extend(&self.extra_vars);
        vars
    }

    /// Render, send and classify one template
    pub async fn execute(
        &self,
        template: &RequestTemplate,
        ctx: &SharedContext,
        session: &ClientSession,
    ) -> RequestOutcome {
        let vars = self.vars_for(ctx, session);
        let prepared = template.render(&vars, session.user.as_ref());

        let sent_at = Utc::now();
        let started = Instant::now();
        let raw = self.target.execute(&prepared).await;
        let latency = started.elapsed();
        let completed_at = Utc::now();

        let classification = self
            .classifier
            .classify_with(&raw, template.success.as_ref());

        tracing::trace!(
            ordinal = session.ordinal,
            request = %template.name,
            outcome = classification.kind.label(),
            status = ?classification.status,
            latency_ms = latency.as_secs_f64() * 1000.0,
            "Request completed"
        );

        RequestOutcome {
            request: template.name.clone(),
            ordinal: session.ordinal,
            sent_at,
            completed_at,
            latency_ms: latency.as_secs_f64() * 1000.0,
            classification,
            tags: BTreeMap::new(),
        }
    }
}

#[async_trait]
impl Workload for TemplateWorkload {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, ctx: &SharedContext, ordinal: usize) -> Result<ClientSession, SessionError> {
        let user = match self.binding {
            SessionBinding::Anonymous => None,
            SessionBinding::Shared => Some(ctx.primary.clone().ok_or(SessionError::MissingPrimary)?),
            SessionBinding::PerOrdinal => Some(
                ctx.user(ordinal)
                    .cloned()
                    .ok_or(SessionError::MissingUser { ordinal })?,
            ),
            SessionBinding::RoundRobin => {
                let available = ctx.provisioned_count();
                if available == 0 {
                    return Err(SessionError::NoUsers);
                }
                ctx.provisioned()
                    .nth(ordinal.saturating_sub(1) % available)
                    .cloned()
            }
        };

        Ok(ClientSession {
            ordinal,
            user,
            iteration: 0,
        })
    }

    async fn iteration(
        &self,
        ctx: &SharedContext,
        session: &mut ClientSession,
    ) -> Vec<RequestOutcome> {
        let template = match self.sampler.sample() {
            Ok(template) => template,
            Err(e) => {
                tracing::warn!(
                    ordinal = session.ordinal,
                    sampler = self.sampler.name(),
                    error = %e,
                    "Sampler produced no request"
                );
                return Vec::new();
            }
        };

        let outcome = self.execute(&template, ctx, session).await;
        session.iteration += 1;
        vec![outcome]
    }
}

impl std::fmt::Debug for TemplateWorkload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateWorkload")
            .field("name", &self.name)
            .field("sampler", &self.sampler.name())
            .field("target", &self.target.target_name())
            .field("binding", &self.binding)
            .finish()
    }
}
