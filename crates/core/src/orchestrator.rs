use crate::auth::Principal;
use crate::config::Settings;
use crate::domain::basket::{Basket, GenerationRequest, Risk, Snapshot};
use crate::domain::contract::normalize_baskets;
use crate::generation::error::GenerationFailure;
use crate::generation::BasketGenerator;
use crate::storage::SnapshotStore;
use anyhow::Context;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// How concurrent `generate` calls relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationPolicy {
    /// Calls run side by side; the last successful commit becomes the live snapshot.
    #[default]
    Concurrent,
    /// One generation at a time per orchestrator; later callers wait their turn.
    SingleFlight,
}

impl GenerationPolicy {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        match settings.generation_policy.as_deref() {
            None => Ok(Self::default()),
            Some(s) => s
                .parse()
                .context("invalid BASKET_GENERATION_POLICY"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationPolicy::Concurrent => "concurrent",
            GenerationPolicy::SingleFlight => "single_flight",
        }
    }
}

impl FromStr for GenerationPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "concurrent" => Ok(GenerationPolicy::Concurrent),
            "single_flight" => Ok(GenerationPolicy::SingleFlight),
            other => anyhow::bail!(
                "unknown generation policy {other:?} (expected concurrent or single_flight)"
            ),
        }
    }
}

#[derive(Debug)]
pub enum OrchestrationError {
    InvalidInput(String),
    Generation(GenerationFailure),
    /// The result was computed but could not be made durable. The live
    /// snapshot did not move; `baskets` is what the caller asked for.
    Persist {
        baskets: Vec<Basket>,
        source: anyhow::Error,
    },
}

impl OrchestrationError {
    pub fn stage(&self) -> &'static str {
        match self {
            OrchestrationError::InvalidInput(_) => "validation",
            OrchestrationError::Generation(_) => "generation",
            OrchestrationError::Persist { .. } => "persist",
        }
    }
}

impl fmt::Display for OrchestrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestrationError::InvalidInput(detail) => write!(f, "invalid input: {detail}"),
            OrchestrationError::Generation(failure) => write!(f, "{failure}"),
            OrchestrationError::Persist { source, .. } => {
                write!(f, "failed to persist snapshot: {source:#}")
            }
        }
    }
}

impl std::error::Error for OrchestrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OrchestrationError::InvalidInput(_) => None,
            OrchestrationError::Generation(failure) => Some(failure),
            OrchestrationError::Persist { source, .. } => Some(&**source),
        }
    }
}

/// Checks the request before anything with side effects runs.
pub fn validate(request: &GenerationRequest) -> Result<(f64, Risk), OrchestrationError> {
    if !request.investment.is_finite() {
        return Err(OrchestrationError::InvalidInput(
            "investment must be a number".to_string(),
        ));
    }
    if request.investment <= 0.0 {
        return Err(OrchestrationError::InvalidInput(
            "investment must be positive".to_string(),
        ));
    }

    let risk = request
        .risk
        .parse::<Risk>()
        .map_err(|e| OrchestrationError::InvalidInput(e.to_string()))?;

    Ok((request.investment, risk))
}

pub struct BasketOrchestrator {
    store: Arc<dyn SnapshotStore>,
    generator: Arc<dyn BasketGenerator>,
    policy: GenerationPolicy,
    in_flight: Mutex<()>,
}

impl BasketOrchestrator {
    pub fn new(store: Arc<dyn SnapshotStore>, generator: Arc<dyn BasketGenerator>) -> Self {
        Self {
            store,
            generator,
            policy: GenerationPolicy::default(),
            in_flight: Mutex::new(()),
        }
    }

    pub fn with_policy(mut self, policy: GenerationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> GenerationPolicy {
        self.policy
    }

    /// Runs one generation: validate, optionally clear, invoke, normalize,
    /// then commit with the next generation id.
    pub async fn generate(
        &self,
        principal: &Principal,
        request: &GenerationRequest,
    ) -> Result<Snapshot, OrchestrationError> {
        let (investment, risk) = validate(request)?;

        let _single_flight = match self.policy {
            GenerationPolicy::SingleFlight => Some(self.in_flight.lock().await),
            GenerationPolicy::Concurrent => None,
        };

        let started = Instant::now();
        tracing::info!(
            subject = principal.subject(),
            investment,
            %risk,
            force_new = request.force_new,
            generator = self.generator.name(),
            "starting basket generation"
        );

        if request.force_new {
            match self.store.clear().await {
                Ok(cleared) => tracing::info!(
                    generation_id = cleared.generation_id,
                    "cleared live baskets before generation"
                ),
                Err(e) => tracing::warn!(
                    error = %format!("{e:#}"),
                    "failed to clear live baskets; continuing with generation"
                ),
            }
        }

        let raw = self.generator.invoke(investment, risk).await.map_err(|failure| {
            tracing::error!(
                reason = %failure.reason,
                detail = %failure.detail,
                elapsed_ms = started.elapsed().as_millis(),
                "basket generation failed; live snapshot unchanged"
            );
            OrchestrationError::Generation(failure)
        })?;

        let raw_count = raw.len();
        let baskets = normalize_baskets(raw, risk);
        if baskets.len() < raw_count {
            tracing::warn!(
                raw_count,
                kept = baskets.len(),
                "dropped baskets without valid stocks"
            );
        }

        match self.store.commit_generation(baskets.clone()).await {
            Ok(snapshot) => {
                tracing::info!(
                    generation_id = snapshot.generation_id,
                    baskets = snapshot.baskets.len(),
                    stocks = snapshot.baskets.iter().map(|b| b.stocks.len()).sum::<usize>(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "basket generation committed"
                );
                Ok(snapshot)
            }
            Err(source) => {
                tracing::error!(
                    error = %format!("{source:#}"),
                    baskets = baskets.len(),
                    "failed to persist generated baskets; returning them without advancing the snapshot"
                );
                Err(OrchestrationError::Persist { baskets, source })
            }
        }
    }
}
