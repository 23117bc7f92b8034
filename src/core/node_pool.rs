//! Node pool and working-schedule definitions.
//!
//! A pool groups nodes provisioned from the same autoscaler template. Pools
//! flagged `is_keda` follow a business-hours duty cycle and reference the
//! compiled-in weekday schedule by default.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use crate::core::node::Taint;

pub const DEFAULT_SCHEDULE: &str = "default";
pub const KEDA_SCHEDULE: &str = "keda-weekdays-12h";

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConsolidationPolicy {
    #[default]
    WhenUnderutilized,
    WhenEmpty,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodePool {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
    #[serde(default)]
    pub is_keda: bool,
    #[serde(default = "default_schedule_name")]
    pub schedule_name: String,
    #[serde(default)]
    pub consolidation_policy: ConsolidationPolicy,
}

fn default_schedule_name() -> String {
    DEFAULT_SCHEDULE.to_string()
}

impl NodePool {
    /// Placeholder pool inferred from a name alone, used when a mutation
    /// references a pool the snapshot has never seen.
    pub fn inferred(name: &str) -> Self {
        let is_keda = name.to_lowercase().contains("keda");
        Self {
            name: name.to_string(),
            labels: Default::default(),
            taints: Default::default(),
            is_keda,
            schedule_name: if is_keda { KEDA_SCHEDULE } else { DEFAULT_SCHEDULE }.to_string(),
            consolidation_policy: ConsolidationPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    pub name: String,
    #[serde(default = "default_hours_per_day")]
    pub hours_per_day: f64,
    #[serde(default = "default_days_per_week")]
    pub days_per_week: f64,
}

fn default_hours_per_day() -> f64 {
    24.0
}

fn default_days_per_week() -> f64 {
    7.0
}

impl Schedule {
    pub fn default_24x7() -> Self {
        Self {
            name: DEFAULT_SCHEDULE.to_string(),
            hours_per_day: 24.0,
            days_per_week: 7.0,
        }
    }

    pub fn keda_weekdays_12h() -> Self {
        Self {
            name: KEDA_SCHEDULE.to_string(),
            hours_per_day: 12.0,
            days_per_week: 5.0,
        }
    }

    pub fn effective_hours_per_day(&self) -> f64 {
        self.hours_per_day * (self.days_per_week / 7.0)
    }
}
