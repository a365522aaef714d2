//! World-wide tuning.

use crate::error::BeltError;
use crate::scheduler::DEFAULT_BUDGET_CAP;
use crate::grid::{Facing, GridPos};
use crate::segment::{CapacityRule, SegmentConfig, DEFAULT_SLOTS_PER_UNIT};
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

/// Configuration shared by every belt in one world.
///
/// Missing fields take their defaults when loaded from JSON.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeltConfig {
    /// Travel ticks for belts placed without an explicit speed.
    pub default_travel_ticks: u32,
    /// Slots per block on curved belts.
    pub slots_per_unit: usize,
    /// Upper bound on a belt's step accumulator.
    pub max_step_budget: f64,
    /// Observers farther than this from both anchors get no snapshots.
    pub visual_range: f64,
    /// Bucket size of the observer grid.
    pub observer_cell_size: f64,
    /// Floor for the client prediction step cap; the cap is at least twice
    /// the belt capacity.
    pub min_prediction_steps: usize,
    /// How many belt boundaries a predicted item may cross.
    pub dead_reckon_hops: usize,
}

impl Default for BeltConfig {
    fn default() -> Self {
        Self {
            default_travel_ticks: 60,
            slots_per_unit: DEFAULT_SLOTS_PER_UNIT,
            max_step_budget: DEFAULT_BUDGET_CAP,
            visual_range: 16.0,
            observer_cell_size: 16.0,
            min_prediction_steps: 256,
            dead_reckon_hops: 256,
        }
    }
}

impl BeltConfig {
    pub fn from_json(json: &str) -> Result<Self, BeltError> {
        let config: BeltConfig = serde_json::from_str(json)?;
        config.validated()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    fn validated(self) -> Result<Self, BeltError> {
        if self.default_travel_ticks == 0 {
            return Err(BeltError::InvalidConfig("default_travel_ticks must be at least 1".into()));
        }
        if !(self.max_step_budget.is_finite() && self.max_step_budget >= 1.0) {
            return Err(BeltError::InvalidConfig("max_step_budget must be at least 1".into()));
        }
        if !(self.visual_range.is_finite() && self.visual_range >= 0.0) {
            return Err(BeltError::InvalidConfig("visual_range must be non-negative".into()));
        }
        if !(self.observer_cell_size.is_finite() && self.observer_cell_size > 0.0) {
            return Err(BeltError::InvalidConfig("observer_cell_size must be positive".into()));
        }
        Ok(self)
    }

    /// Straight belt at this world's default speed.
    pub fn straight(&self, facing: Facing) -> SegmentConfig {
        SegmentConfig::straight(facing).with_travel_ticks(self.default_travel_ticks)
    }

    /// Curved belt at this world's default speed and density.
    pub fn curve(&self, start_facing: Facing, end: GridPos, end_facing: Facing) -> SegmentConfig {
        SegmentConfig {
            capacity: CapacityRule::CurveEstimate {
                slots_per_unit: self.slots_per_unit,
            },
            ..SegmentConfig::curve(start_facing, end, end_facing)
        }
        .with_travel_ticks(self.default_travel_ticks)
    }
}
