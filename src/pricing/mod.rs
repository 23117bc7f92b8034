//! Process-wide cache of hourly instance prices.
//!
//! The table is an injected dependency guarded by its own mutex, refreshable
//! from an external oracle. A refresh merges entries and never drops an
//! existing price, so a short oracle response cannot silently zero a price.
//! Snapshots overlay their own `prices` map on this cache at read time.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use lazy_static::lazy_static;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::common::{InstancePrice, InstanceType};

pub const DEFAULT_REGION: &str = "eu-central-1";

lazy_static! {
    /// Baseline on-demand prices for the instance types the fleet actually
    /// runs, so a fresh process produces sensible costs before any refresh.
    static ref DEFAULT_PRICES: BTreeMap<&'static str, f64> = BTreeMap::from([
        ("t3a.medium", 0.0432),
        ("t3a.large", 0.0864),
        ("t3a.xlarge", 0.1728),
        ("r6a.large", 0.1368),
        ("r6a.xlarge", 0.2736),
    ]);
}

#[derive(Debug, Error)]
pub enum PriceError {
    #[error("cannot read price file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed price file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceEntry {
    pub usd_per_hour: f64,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricingState {
    pub region: String,
    pub hourly_prices: BTreeMap<InstanceType, PriceEntry>,
}

impl PricingState {
    fn with_defaults(region: &str) -> Self {
        let hourly_prices = DEFAULT_PRICES
            .iter()
            .map(|(inst, price)| {
                (
                    inst.to_string(),
                    PriceEntry {
                        usd_per_hour: *price,
                        source: "builtin".to_string(),
                    },
                )
            })
            .collect();
        Self {
            region: region.to_string(),
            hourly_prices,
        }
    }
}

/// On-disk price file: `{region, prices}` with `hourly_prices` accepted as a
/// legacy spelling of the map.
#[derive(Debug, Default, Deserialize)]
struct PriceFile {
    region: Option<String>,
    #[serde(default)]
    prices: BTreeMap<InstanceType, f64>,
    #[serde(default)]
    hourly_prices: BTreeMap<InstanceType, f64>,
}

/// Best-effort source of fresh hourly prices, typically the IaaS pricing
/// API. Implementations must not assume they are called under any lock.
pub trait PriceOracle: Send + Sync {
    fn fetch_hourly_prices(
        &self,
        region: &str,
        instance_types: &[InstanceType],
    ) -> anyhow::Result<BTreeMap<InstanceType, f64>>;
}

/// Oracle that reports nothing, leaving the cache untouched. Stands in when
/// no pricing integration is configured.
pub struct NullOracle;

impl PriceOracle for NullOracle {
    fn fetch_hourly_prices(
        &self,
        _region: &str,
        instance_types: &[InstanceType],
    ) -> anyhow::Result<BTreeMap<InstanceType, f64>> {
        info!(
            "price oracle is not configured, keeping existing prices for {} instance types",
            instance_types.len()
        );
        Ok(BTreeMap::new())
    }
}

pub struct PriceTable {
    state: Mutex<PricingState>,
}

impl PriceTable {
    pub fn with_defaults(region: Option<&str>) -> Self {
        Self {
            state: Mutex::new(PricingState::with_defaults(
                region.unwrap_or(DEFAULT_REGION),
            )),
        }
    }

    /// Replaces the cache with the contents of a JSON price file.
    pub fn load_from_file(&self, path: &Path) -> Result<usize, PriceError> {
        let file: PriceFile = serde_json::from_str(&fs::read_to_string(path)?)?;
        let prices = if !file.prices.is_empty() {
            file.prices
        } else {
            file.hourly_prices
        };

        let mut state = self.state.lock().unwrap();
        state.region = file.region.unwrap_or_else(|| DEFAULT_REGION.to_string());
        state.hourly_prices = prices
            .into_iter()
            .map(|(inst, price)| {
                (
                    inst,
                    PriceEntry {
                        usd_per_hour: price,
                        source: "file".to_string(),
                    },
                )
            })
            .collect();
        info!(
            "loaded {} instance prices for region {} from {}",
            state.hourly_prices.len(),
            state.region,
            path.display()
        );
        Ok(state.hourly_prices.len())
    }

    /// `(price, missing)`; a missing instance type prices at zero and the
    /// flag must be propagated to the caller.
    pub fn lookup(&self, instance_type: &str) -> (f64, bool) {
        let state = self.state.lock().unwrap();
        match state.hourly_prices.get(instance_type) {
            Some(entry) => (entry.usd_per_hour, false),
            None => (0.0, true),
        }
    }

    pub fn state(&self) -> PricingState {
        self.state.lock().unwrap().clone()
    }

    /// Pulls prices for `instance_types` from the oracle and merges them in.
    /// Entries the oracle does not return stay as they are.
    pub fn refresh_from_oracle(
        &self,
        oracle: &dyn PriceOracle,
        instance_types: &[InstanceType],
    ) -> anyhow::Result<PricingState> {
        let region = self.state.lock().unwrap().region.clone();
        let fetched = oracle.fetch_hourly_prices(&region, instance_types)?;

        let mut state = self.state.lock().unwrap();
        if fetched.len() < instance_types.len() {
            warn!(
                "price oracle returned {} of {} requested instance types, keeping the rest",
                fetched.len(),
                instance_types.len()
            );
        }
        for (inst, price) in fetched {
            state.hourly_prices.insert(
                inst,
                PriceEntry {
                    usd_per_hour: price,
                    source: "oracle".to_string(),
                },
            );
        }
        Ok(state.clone())
    }
}

/// Read-time view combining a snapshot's own price overlay with a copy of
/// the shared cache. Passing this by value keeps the simulator a pure
/// function of `(snapshot, price table)`.
pub struct PriceView {
    overlay: BTreeMap<InstanceType, f64>,
    base: PricingState,
}

impl PriceView {
    pub fn new(overlay: &BTreeMap<InstanceType, InstancePrice>, table: &PriceTable) -> Self {
        Self::with_state(overlay, table.state())
    }

    /// Builds a view from an already-copied cache state, for callers that
    /// must not touch the table's lock while holding another one.
    pub fn with_state(overlay: &BTreeMap<InstanceType, InstancePrice>, base: PricingState) -> Self {
        Self {
            overlay: overlay
                .iter()
                .map(|(inst, price)| (inst.clone(), price.usd_per_hour))
                .collect(),
            base,
        }
    }

    pub fn lookup(&self, instance_type: &str) -> (f64, bool) {
        if let Some(price) = self.overlay.get(instance_type) {
            return (*price, false);
        }
        match self.base.hourly_prices.get(instance_type) {
            Some(entry) => (entry.usd_per_hour, false),
            None => (0.0, true),
        }
    }
}
