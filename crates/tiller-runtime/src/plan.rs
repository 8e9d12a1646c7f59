// Copyright (c) 2025-2026 Tiller Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use regex::Regex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use tiller_config::RetryConfig;
use tiller_core::{Agent, AgentEvent};
use tiller_model::{Message, UserMessage};

use crate::resolver::TransportResolver;

/// Exponential inter-attempt delay: `base × multiplier^attempt`, capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Backoff {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = self.base.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(ms as u64).min(self.max)
    }
}

/// One step of an execution plan: a model, an attempt budget, a backoff
/// schedule, and a predicate deciding whether an error is retried here
/// or handed to the next step.
pub struct PlanStep {
    pub model: String,
    pub label: String,
    pub max_attempts: u32,
    pub backoff: Backoff,
    retry_when: Vec<Regex>,
}

impl PlanStep {
    pub fn new(model: impl Into<String>, label: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            model: model.into(),
            label: label.into(),
            max_attempts: max_attempts.max(1),
            backoff: Backoff {
                base: Duration::from_millis(0),
                multiplier: 2.0,
                max: Duration::from_secs(30),
            },
            retry_when: Vec::new(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Add a retry pattern matched against the error text.
    pub fn retry_on(mut self, pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(re) => self.retry_when.push(re),
            Err(e) => warn!(pattern, error = %e, "ignoring invalid retry pattern"),
        }
        self
    }

    /// Whether `error` is worth another attempt at this step.
    pub fn should_retry(&self, error: &anyhow::Error, _attempt: u32) -> bool {
        let text = error.to_string();
        self.retry_when.iter().any(|re| re.is_match(&text))
    }
}

/// Ordered retry/fallback combinator around one prompt attempt.
///
/// Per attempt the plan snapshots the agent's message list, sets the
/// step's model, and invokes the attempt; a failure restores the
/// snapshot so the next attempt sees the exact initial state.  A success
/// short-circuits; the final failure propagates the last error.
pub struct ExecutionPlan {
    steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self { steps }
    }

    /// Typical shape from user settings: the primary model with
    /// exponential backoff on transient errors, then the fallback model.
    pub fn from_config(retry: &RetryConfig, primary_model: &str) -> Self {
        let backoff = Backoff {
            base: Duration::from_millis(retry.base_delay_ms),
            multiplier: 2.0,
            max: Duration::from_millis(retry.max_delay_ms),
        };
        let mut primary = PlanStep::new(primary_model, "primary", retry.max_attempts)
            .with_backoff(backoff.clone());
        for pattern in &retry.retry_on {
            primary = primary.retry_on(pattern);
        }
        let mut steps = vec![primary];

        if let Some(fallback) = &retry.fallback {
            let mut step = PlanStep::new(&fallback.model, "fallback", fallback.max_attempts)
                .with_backoff(backoff);
            for pattern in &retry.retry_on {
                step = step.retry_on(pattern);
            }
            steps.push(step);
        }
        Self::new(steps)
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// Run one prompt under this plan.
    pub async fn run(
        &self,
        agent: &mut Agent,
        resolver: &dyn TransportResolver,
        user: UserMessage,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<Vec<Message>> {
        let mut last_error: Option<anyhow::Error> = None;

        for step in &self.steps {
            let transport = match resolver.resolve(&step.model) {
                Ok(t) => t,
                Err(e) => {
                    warn!(model = %step.model, error = %e, "skipping unresolvable plan step");
                    last_error = Some(e);
                    continue;
                }
            };

            for attempt in 0..step.max_attempts {
                let snapshot = agent.snapshot_messages();
                agent.set_transport(transport.clone());

                match agent.prompt_with_message(user.clone(), tx.clone()).await {
                    Ok(added) => return Ok(added),
                    Err(error) => {
                        agent.restore_messages(snapshot);
                        let retry_here =
                            attempt + 1 < step.max_attempts && step.should_retry(&error, attempt);
                        debug!(
                            step = %step.label,
                            attempt,
                            retry_here,
                            error = %error,
                            "prompt attempt failed"
                        );
                        last_error = Some(error);
                        if !retry_here {
                            break;
                        }
                        let delay = step.backoff.delay_for(attempt);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("execution plan has no steps")))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
