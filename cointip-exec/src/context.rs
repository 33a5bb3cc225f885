//! Shared collaborators of the execution layer.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::warn;

use cointip_domain::{CoinUnit, FiatUnit, TipSettings};
use cointip_store::Store;

use crate::ports::{LedgerPort, PlatformPort, RatePort};

/// Everything an action needs to run: ports, store and configuration.
///
/// Built once at startup and handed to each component's constructor.
#[derive(Clone)]
pub struct Services {
    pub ledger: Arc<dyn LedgerPort>,
    pub platform: Arc<dyn PlatformPort>,
    pub rates: Arc<dyn RatePort>,
    pub store: Arc<dyn Store>,
    pub settings: Arc<TipSettings>,
}

impl Services {
    /// Rate for a pair; a provider failure is logged and treated as unknown.
    pub async fn rate(&self, coin: &CoinUnit, fiat: &FiatUnit) -> Option<Decimal> {
        match self.rates.rate(coin, fiat).await {
            Ok(rate) => rate.filter(|r| *r > Decimal::ZERO),
            Err(e) => {
                warn!(coin = %coin, fiat = %fiat, error = %e, "Rate lookup failed");
                None
            }
        }
    }
}
