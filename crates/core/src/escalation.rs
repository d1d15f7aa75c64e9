//! Deadline math for the auto-approve escalation timer.
//!
//! A chain whose snapshot carries `auto_approve_after_days > 0` accrues a
//! deadline from the moment its current step became active. Past the
//! deadline the sweep resolves the step as the system actor.

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::domain::chain::ChainInstance;

/// How waiting days are counted. Tenant configuration decides this per
/// definition; the value is snapshotted into every chain instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayConvention {
    Calendar,
    /// Saturdays and Sundays do not count towards the waiting period.
    Business,
}

impl DayConvention {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "calendar" => Some(Self::Calendar),
            "business" => Some(Self::Business),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calendar => "calendar",
            Self::Business => "business",
        }
    }
}

fn is_weekend(at: DateTime<Utc>) -> bool {
    matches!(at.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Deadline after which a step activated at `activated_at` may be
/// auto-approved.
#[must_use]
pub fn deadline(
    activated_at: DateTime<Utc>,
    waiting_days: u32,
    convention: DayConvention,
) -> DateTime<Utc> {
    match convention {
        DayConvention::Calendar => activated_at + Duration::days(i64::from(waiting_days)),
        DayConvention::Business => {
            let mut at = activated_at;
            let mut remaining = waiting_days;
            while remaining > 0 {
                at += Duration::days(1);
                if !is_weekend(at) {
                    remaining -= 1;
                }
            }
            at
        }
    }
}

/// Escalation deadline of the chain's current step, if escalation applies
/// at all (in-progress chain, non-zero waiting period, activated step).
#[must_use]
pub fn chain_deadline(chain: &ChainInstance) -> Option<DateTime<Utc>> {
    if chain.auto_approve_after_days == 0 {
        return None;
    }
    let step = chain.current_step()?;
    let activated_at = step.activated_at?;
    Some(deadline(activated_at, chain.auto_approve_after_days, chain.day_convention))
}

/// Whether the chain's current step is overdue at `now`.
#[must_use]
pub fn is_due(chain: &ChainInstance, now: DateTime<Utc>) -> bool {
    chain_deadline(chain).is_some_and(|due| now >= due)
}
