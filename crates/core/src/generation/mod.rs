pub mod error;
pub mod json;
pub mod subprocess;

use crate::domain::basket::Risk;
use crate::domain::contract::RawBasket;
use crate::generation::error::GenerationFailure;

/// Computes baskets for an amount and risk level.
///
/// The orchestrator only sees this seam, so the subprocess can be swapped for
/// an in-process implementation without touching it.
#[async_trait::async_trait]
pub trait BasketGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn invoke(&self, investment: f64, risk: Risk)
        -> Result<Vec<RawBasket>, GenerationFailure>;
}
