//! Free-tier limits and gating decisions
//!
//! Everything here is a pure function of persisted counters, the configured
//! [`UsageLimits`] and the entitlement flag. Rejections are values, not errors;
//! the caller decides how to surface them.

use doc_model::{MeasurementKind, UsageCounters};
use serde::Serialize;

/// Which privileged operation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GatingReason {
    Measurements,
    Length,
    Storage,
    Filesize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GatingDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<GatingReason>,
}

impl GatingDecision {
    pub const fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub const fn deny(reason: GatingReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }

    fn from_check(allowed: bool, reason: GatingReason) -> Self {
        if allowed {
            Self::allow()
        } else {
            Self::deny(reason)
        }
    }
}

/// Limits applied to users without an entitlement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageLimits {
    pub max_saved_sessions: u32,
    pub max_file_size_bytes: u64,
    /// `None` places no cap on the number of measurements per session
    pub max_measurements: Option<usize>,
}

impl Default for UsageLimits {
    fn default() -> Self {
        Self {
            max_saved_sessions: 1,
            max_file_size_bytes: 5 * 1024 * 1024,
            max_measurements: None,
        }
    }
}

impl UsageLimits {
    pub fn with_max_saved_sessions(mut self, max_saved_sessions: u32) -> Self {
        self.max_saved_sessions = max_saved_sessions;
        self
    }

    pub fn with_max_file_size_bytes(mut self, max_file_size_bytes: u64) -> Self {
        self.max_file_size_bytes = max_file_size_bytes;
        self
    }

    pub fn with_max_measurements(mut self, max_measurements: usize) -> Self {
        self.max_measurements = Some(max_measurements);
        self
    }
}

pub fn can_save_more(counters: &UsageCounters, limit: u32) -> bool {
    counters.saved_count < limit
}

pub fn can_upload_file(size_bytes: u64, limit_bytes: u64) -> bool {
    size_bytes <= limit_bytes
}

pub fn length_measurement_allowed(entitled: bool) -> bool {
    entitled
}

pub fn measurement_allowed(count: usize, limit: Option<usize>) -> bool {
    limit.map_or(true, |limit| count < limit)
}

/// Saves left before the storage gate closes
pub fn remaining_saves(counters: &UsageCounters, limit: u32) -> u32 {
    limit.saturating_sub(counters.saved_count)
}

pub fn save_decision(counters: &UsageCounters, limits: &UsageLimits, entitled: bool) -> GatingDecision {
    if entitled {
        return GatingDecision::allow();
    }
    GatingDecision::from_check(
        can_save_more(counters, limits.max_saved_sessions),
        GatingReason::Storage,
    )
}

pub fn upload_decision(size_bytes: u64, limits: &UsageLimits, entitled: bool) -> GatingDecision {
    if entitled {
        return GatingDecision::allow();
    }
    GatingDecision::from_check(
        can_upload_file(size_bytes, limits.max_file_size_bytes),
        GatingReason::Filesize,
    )
}

/// Whether a new draft of `kind` may be started given the current count
pub fn draft_decision(
    kind: MeasurementKind,
    measurement_count: usize,
    limits: &UsageLimits,
    entitled: bool,
) -> GatingDecision {
    if entitled {
        return GatingDecision::allow();
    }
    if kind == MeasurementKind::Polyline && !length_measurement_allowed(entitled) {
        return GatingDecision::deny(GatingReason::Length);
    }
    GatingDecision::from_check(
        measurement_allowed(measurement_count, limits.max_measurements),
        GatingReason::Measurements,
    )
}

/// Document history is only kept for entitled users
pub fn history_decision(entitled: bool) -> GatingDecision {
    GatingDecision::from_check(entitled, GatingReason::Storage)
}
