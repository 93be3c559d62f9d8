//! Scenario presets for the commerce service
//!
//! Each preset bundles an executor, a traffic mix, a setup plan and the
//! thresholds that decide the verdict.

use serde::{Deserialize, Serialize};
use serde_json::json;
use shop_bench_core::{
    names, BenchError, BenchResult, ExecutorKind, ProductSpec, RequestSeries, RequestTemplate,
    RunConfig, SessionBinding, SetupPlan, StagePlan, SuccessSet, ThinkTime,
};
use shop_bench_http::ShippingAddress;
use shop_bench_report::Threshold;
use shop_bench_samplers::{TrafficMixer, Weighted};
use std::time::Duration;

/// Built-in scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    /// 70/30 product listing and profile reads under a ramping spike
    DealSpike,
    /// Profile reads with a shared session
    AuthStress,
    /// Order creation by a pool of users under a ramp
    OrderStress,
    /// Order creation far beyond capacity with a short timeout
    OrderOverload,
    /// One order per client against a product with limited stock
    FifoOrder,
    /// Anonymous product listing at constant concurrency
    ProductList,
    /// Product creation over a fixed total
    ProductInsert,
    /// Order listing on a seeded account
    OrderList,
}

impl ScenarioKind {
    /// Every preset
    pub const ALL: [ScenarioKind; 8] = [
        ScenarioKind::DealSpike,
        ScenarioKind::AuthStress,
        ScenarioKind::OrderStress,
        ScenarioKind::OrderOverload,
        ScenarioKind::FifoOrder,
        ScenarioKind::ProductList,
        ScenarioKind::ProductInsert,
        ScenarioKind::OrderList,
    ];

    /// Kebab-case name
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioKind::DealSpike => "deal-spike",
            ScenarioKind::AuthStress => "auth-stress",
            ScenarioKind::OrderStress => "order-stress",
            ScenarioKind::OrderOverload => "order-overload",
            ScenarioKind::FifoOrder => "fifo-order",
            ScenarioKind::ProductList => "product-list",
            ScenarioKind::ProductInsert => "product-insert",
            ScenarioKind::OrderList => "order-list",
        }
    }
}

/// Knobs a preset reads; `None` means the preset's own default
#[derive(Debug, Clone, Default)]
pub struct ScenarioParams {
    /// Run identifier embedded in account emails
    pub run_id: String,
    /// Peak clients of ramping presets
    pub max_clients: Option<usize>,
    /// Ramp-up duration
    pub ramp: Option<Duration>,
    /// Hold duration at peak
    pub hold: Option<Duration>,
    /// Accounts to provision
    pub users: Option<usize>,
    /// Per-request timeout of the order presets
    pub request_timeout: Option<Duration>,
    /// Stock of the contended product
    pub initial_stock: Option<u32>,
    /// Clients of constant presets
    pub clients: Option<usize>,
    /// Duration of constant presets
    pub duration: Option<Duration>,
    /// Products created by `product-insert`
    pub total_products: Option<usize>,
    /// Orders seeded by `order-list`
    pub orders_per_user: Option<usize>,
    /// Overall deadline; defaults to the plan length plus the graceful stop
    pub max_duration: Option<Duration>,
    /// Run-wide iteration rate cap
    pub rate_limit: Option<f64>,
}

/// FIFO check settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FairnessCheck {
    /// Units of the contended resource
    pub capacity: usize,
    /// Clients expected to attempt it
    pub clients: usize,
    /// Request whose first outcome per client is judged
    pub request: String,
}

/// A fully specified run
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Preset name
    pub name: String,
    /// Scheduler configuration
    pub run: RunConfig,
    /// Setup plan
    pub setup: SetupPlan,
    /// Weighted templates each iteration draws from
    pub mix: Vec<Weighted<RequestTemplate>>,
    /// Credentials each client binds to
    pub binding: SessionBinding,
    /// Pass/fail thresholds
    pub thresholds: Vec<Threshold>,
    /// FIFO verification, if the scenario runs one
    pub fairness: Option<FairnessCheck>,
    /// Extra per-request series the sink records
    pub series: Vec<RequestSeries>,
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn threshold(metric: &str, expression: &str) -> BenchResult<Threshold> {
    Threshold::parse(metric, expression).map_err(|e| BenchError::config(e.to_string()))
}

fn tagged(metric: &str, request: &str) -> String {
    format!("{metric}{{request={request}}}")
}

fn order_body(quantity: u32) -> serde_json::Value {
    json!({
        "items": [{"product_id": "{{product_id}}", "quantity": quantity}],
        "shipping_address": ShippingAddress::default(),
    })
}

fn create_order(timeout: Duration) -> RequestTemplate {
    RequestTemplate::post("create_order", "/orders", order_body(1))
        .bearer()
        .with_user_header()
        .with_timeout(timeout)
        .expect(SuccessSet::codes(&[201]))
}

fn contended_product(name: &str, stock: u32) -> ProductSpec {
    ProductSpec {
        name: name.to_string(),
        description: "load test product".to_string(),
        price: 10_000,
        stock,
    }
}

impl Scenario {
    /// Build a preset
    pub fn preset(kind: ScenarioKind, params: &ScenarioParams) -> BenchResult<Self> {
        let setup = SetupPlan::new(params.run_id.clone());
        let ramping = |peak: usize, ramp: u64, hold: u64, down: u64, start: usize| {
            ExecutorKind::RampingClients {
                plan: StagePlan::ramp_hold_down(
                    start,
                    params.max_clients.unwrap_or(peak),
                    params.ramp.unwrap_or(secs(ramp)),
                    params.hold.unwrap_or(secs(hold)),
                    secs(down),
                ),
            }
        };
        let constant = || ExecutorKind::ConstantClients {
            clients: params.clients.unwrap_or(10),
            duration: params.duration.unwrap_or(secs(30)),
        };

        let scenario = match kind {
            ScenarioKind::DealSpike => Scenario {
                name: kind.name().into(),
                run: RunConfig::new(ramping(100, 30, 30, 10, 0))
                    .with_think_time(ThinkTime::Fixed {
                        delay: Duration::from_millis(50),
                    }),
                setup: setup.with_shared_session(),
                mix: vec![
                    Weighted::new(
                        RequestTemplate::get("list_products", "/products?page=1&size=20")
                            .with_timeout(secs(10)),
                        70.0,
                    ),
                    Weighted::new(
                        RequestTemplate::get("me", "/auth/users/me")
                            .bearer()
                            .with_timeout(secs(10)),
                        30.0,
                    ),
                ],
                binding: SessionBinding::Shared,
                thresholds: vec![
                    threshold(names::HTTP_REQ_DURATION, "p(95)<1000")?,
                    threshold(names::ERROR_RATE, "rate<0.05")?,
                ],
                fairness: None,
                series: Vec::new(),
            },

            ScenarioKind::AuthStress => Scenario {
                name: kind.name().into(),
                run: RunConfig::new(ramping(100, 30, 30, 10, 0)),
                setup: setup.with_shared_session(),
                mix: vec![Weighted::new(
                    RequestTemplate::get("me", "/auth/users/me")
                        .bearer()
                        .with_timeout(secs(10)),
                    1.0,
                )],
                binding: SessionBinding::Shared,
                thresholds: vec![
                    threshold(names::HTTP_REQ_DURATION, "p(95)<500")?,
                    threshold(names::ERROR_RATE, "rate<0.05")?,
                ],
                fairness: None,
                series: Vec::new(),
            },

            ScenarioKind::OrderStress => Scenario {
                name: kind.name().into(),
                run: RunConfig::new(ramping(50, 30, 60, 10, 0)).with_think_time(
                    ThinkTime::Fixed {
                        delay: Duration::from_millis(100),
                    },
                ),
                setup: setup
                    .with_population(params.users.unwrap_or(50))
                    .with_product(contended_product("order stress product", 1_000_000)),
                mix: vec![Weighted::new(
                    create_order(params.request_timeout.unwrap_or(secs(30))),
                    1.0,
                )],
                binding: SessionBinding::RoundRobin,
                thresholds: vec![
                    threshold(names::HTTP_REQ_DURATION, "p(95)<2000")?,
                    threshold(names::ERROR_RATE, "rate<0.1")?,
                ],
                fairness: None,
                series: vec![RequestSeries::orders("create_order")],
            },

            ScenarioKind::OrderOverload => Scenario {
                name: kind.name().into(),
                run: RunConfig::new(ramping(500, 10, 30, 5, 10)),
                setup: setup
                    .with_population(params.users.unwrap_or(100))
                    .with_product(contended_product("order overload product", 1_000_000)),
                mix: vec![Weighted::new(
                    create_order(params.request_timeout.unwrap_or(secs(5))),
                    1.0,
                )],
                binding: SessionBinding::RoundRobin,
                thresholds: vec![
                    threshold(names::HTTP_REQ_DURATION, "p(95)<30000")?,
                    threshold(names::ERROR_RATE, "rate<0.99")?,
                ],
                fairness: None,
                series: vec![RequestSeries::orders("create_order")],
            },

            ScenarioKind::FifoOrder => {
                let users = params.users.unwrap_or(20);
                let stock = params.initial_stock.unwrap_or(10);
                Scenario {
                    name: kind.name().into(),
                    run: RunConfig::new(ExecutorKind::PerClientIterations {
                        clients: users,
                        iterations: 1,
                    })
                    .with_max_concurrency(users.max(1))
                    .with_max_duration(secs(60)),
                    setup: setup
                        .with_population(users)
                        .with_product(contended_product("fifo product", stock)),
                    mix: vec![Weighted::new(
                        create_order(params.request_timeout.unwrap_or(secs(30))),
                        1.0,
                    )],
                    binding: SessionBinding::PerOrdinal,
                    thresholds: Vec::new(),
                    fairness: Some(FairnessCheck {
                        capacity: stock as usize,
                        clients: users,
                        request: "create_order".into(),
                    }),
                    series: vec![RequestSeries::orders("create_order")],
                }
            }

            ScenarioKind::ProductList => Scenario {
                name: kind.name().into(),
                run: RunConfig::new(constant()).with_think_time(ThinkTime::Fixed {
                    delay: Duration::from_millis(100),
                }),
                setup,
                mix: vec![Weighted::new(
                    RequestTemplate::get("list_products", "/products?page={{random_page}}&size=20")
                        .with_timeout(secs(10)),
                    1.0,
                )],
                binding: SessionBinding::Anonymous,
                thresholds: vec![
                    threshold(names::HTTP_REQ_DURATION, "p(95)<500")?,
                    threshold(
                        &tagged(names::HTTP_REQ_FAILED, "list_products"),
                        "rate<0.01",
                    )?,
                ],
                fairness: None,
                series: Vec::new(),
            },

            ScenarioKind::ProductInsert => Scenario {
                name: kind.name().into(),
                run: RunConfig::new(ExecutorKind::SharedIterations {
                    clients: params.clients.unwrap_or(10),
                    iterations: params.total_products.unwrap_or(1_000),
                })
                .with_think_time(ThinkTime::Fixed {
                    delay: Duration::from_millis(10),
                }),
                setup: setup.with_shared_session(),
                mix: vec![Weighted::new(
                    RequestTemplate::post(
                        "create_product",
                        "/products",
                        json!({
                            "name": "Product {{unique_id}}",
                            "description": "load test product {{unique_id}}",
                            "price": "{{random_price}}",
                            "stock": "{{random_stock}}",
                        }),
                    )
                    .bearer()
                    .with_timeout(secs(10)),
                    1.0,
                )],
                binding: SessionBinding::Shared,
                thresholds: vec![
                    threshold(names::HTTP_REQ_DURATION, "p(95)<500")?,
                    threshold(
                        &tagged(names::HTTP_REQ_FAILED, "create_product"),
                        "rate<0.01",
                    )?,
                ],
                fairness: None,
                series: Vec::new(),
            },

            ScenarioKind::OrderList => Scenario {
                name: kind.name().into(),
                run: RunConfig::new(constant()).with_think_time(ThinkTime::Fixed {
                    delay: Duration::from_millis(100),
                }),
                setup: setup
                    .with_shared_session()
                    .with_product(contended_product("order list product", 1_000_000))
                    .with_seed_orders(params.orders_per_user.unwrap_or(50)),
                mix: vec![Weighted::new(
                    RequestTemplate::get("list_orders", "/orders?page={{random_page}}&size=20")
                        .bearer()
                        .with_user_header()
                        .with_timeout(secs(10)),
                    1.0,
                )],
                binding: SessionBinding::Shared,
                thresholds: vec![
                    threshold(names::HTTP_REQ_DURATION, "p(95)<500")?,
                    threshold(&tagged(names::HTTP_REQ_FAILED, "list_orders"), "rate<0.01")?,
                ],
                fairness: None,
                series: Vec::new(),
            },
        };

        Ok(scenario.with_limits(params))
    }

    /// Apply the run-wide limits shared by every preset
    fn with_limits(mut self, params: &ScenarioParams) -> Self {
        if let Some(plan) = self.run.executor.stage_plan() {
            let peak = plan.max_target().max(1);
            self.run.max_concurrency = self.run.max_concurrency.max(peak);
            self.run.max_duration = params
                .max_duration
                .unwrap_or(plan.total_duration() + self.run.graceful_stop);
        } else if let Some(max) = params.max_duration {
            self.run.max_duration = max;
        }
        if let Some(clients) = self.run.executor.fixed_clients() {
            self.run.max_concurrency = self.run.max_concurrency.max(clients);
        }
        self.run.rate_limit = params.rate_limit;
        self
    }

    /// Weighted sampler over the scenario's templates
    pub fn mixer(&self) -> BenchResult<TrafficMixer<RequestTemplate>> {
        TrafficMixer::new(self.name.clone(), self.mix.clone())
            .map_err(|e| BenchError::config(format!("scenario {}: {e}", self.name)))
    }

    /// Check the scenario is runnable
    pub fn validate(&self) -> BenchResult<()> {
        self.run
            .validate()
            .map_err(|e| BenchError::config(e.to_string()))?;
        self.mixer()?;

        let needs_session = self.mix.iter().any(|w| w.item.needs_session());
        let has_credentials = match self.binding {
            SessionBinding::Anonymous => false,
            SessionBinding::Shared => self.setup.shared_session,
            SessionBinding::PerOrdinal | SessionBinding::RoundRobin => self.setup.population > 0,
        };
        if needs_session && !has_credentials {
            return Err(BenchError::config(format!(
                "scenario {} sends authenticated requests but provisions no matching session",
                self.name
            )));
        }

        if let Some(check) = &self.fairness {
            if check.capacity == 0 || check.clients == 0 {
                return Err(BenchError::config(
                    "fairness check needs a positive capacity and client count",
                ));
            }
            if self.setup.product.is_none() {
                return Err(BenchError::config(
                    "fairness check needs a product to contend for",
                ));
            }
        }
        Ok(())
    }
}
