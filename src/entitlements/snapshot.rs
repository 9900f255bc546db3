//! Entitlement snapshot model.
//!
//! A snapshot is the server's view of a user's plan, trial and daily usage at
//! a point in time. Snapshots are validated on construction and never mutated
//! afterwards; the store replaces them wholesale.
//!
//! # Wire format
//!
//! ```json
//! {
//!   "plan": "trial",
//!   "hasActiveSubscription": false,
//!   "subscriptionOverride": false,
//!   "isInTrial": true,
//!   "isTrialExpired": false,
//!   "daysRemaining": 9,
//!   "currentPeriodEnd": null,
//!   "usage": {
//!     "leadsCreatedToday": 3, "leadsLimitPerDay": 20,
//!     "totalProperties": 4, "propertiesLimit": 10,
//!     "valuationLookupsToday": 0, "valuationLookupsLimitPerDay": 5,
//!     "aiScoringCallsToday": 1, "aiScoringLimitPerDay": 10,
//!     "messagingAllowed": false
//!   }
//! }
//! ```
//!
//! Limits are positive integers; `-1` or `null` means unlimited.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EntitlementError;

/// Wire value for an unlimited counter.
const UNLIMITED_SENTINEL: i64 = -1;

const SECONDS_PER_DAY: i64 = 86_400;

const fn non_zero(value: u32) -> NonZeroU32 {
    match NonZeroU32::new(value) {
        Some(value) => value,
        None => panic!("limit must be positive"),
    }
}

/// Free-tier daily lead allowance.
pub const FREE_LEADS_PER_DAY: NonZeroU32 = non_zero(20);
/// Free-tier property allowance.
pub const FREE_PROPERTIES: NonZeroU32 = non_zero(10);
/// Free-tier daily third-party valuation lookups.
pub const FREE_VALUATION_LOOKUPS_PER_DAY: NonZeroU32 = non_zero(5);
/// Free-tier daily AI scoring calls.
pub const FREE_AI_SCORING_PER_DAY: NonZeroU32 = non_zero(10);

/// Subscription plan as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Trial,
    Pro,
}

impl Plan {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Trial => "trial",
            Self::Pro => "pro",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper bound of a usage counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Limit {
    /// At most this many units.
    Limited(NonZeroU32),
    /// No upper bound.
    Unlimited,
}

impl Limit {
    /// Create a finite limit. Returns `None` for zero, which is not a valid limit.
    #[must_use]
    pub fn new(max: u32) -> Option<Self> {
        NonZeroU32::new(max).map(Self::Limited)
    }

    /// The finite maximum, or `None` when unlimited.
    #[must_use]
    pub fn max(&self) -> Option<u32> {
        match self {
            Self::Limited(max) => Some(max.get()),
            Self::Unlimited => None,
        }
    }

    /// `current >= limit`; an unlimited counter is never reached.
    #[must_use]
    pub fn is_reached(&self, current: u32) -> bool {
        match self {
            Self::Limited(max) => current >= max.get(),
            Self::Unlimited => false,
        }
    }

    /// Units left before the limit, `None` when unlimited.
    #[must_use]
    pub fn remaining(&self, current: u32) -> Option<u32> {
        self.max().map(|max| max.saturating_sub(current))
    }
}

impl From<NonZeroU32> for Limit {
    fn from(max: NonZeroU32) -> Self {
        Self::Limited(max)
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limited(max) => write!(f, "{}", max),
            Self::Unlimited => f.write_str("unlimited"),
        }
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Limited(max) => serializer.serialize_u32(max.get()),
            Self::Unlimited => serializer.serialize_i64(UNLIMITED_SENTINEL),
        }
    }
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<i64>::deserialize(deserializer)? {
            None | Some(UNLIMITED_SENTINEL) => Ok(Self::Unlimited),
            Some(raw) => u32::try_from(raw)
                .ok()
                .and_then(Self::new)
                .ok_or_else(|| {
                    serde::de::Error::custom(format!(
                        "invalid limit {}: expected a positive integer or -1 for unlimited",
                        raw
                    ))
                }),
        }
    }
}

/// Named usage counters tracked by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    /// Leads created since the start of the day.
    LeadsToday,
    /// Properties held in the account.
    Properties,
    /// Third-party valuation lookups since the start of the day.
    ValuationLookupsToday,
    /// AI scoring calls since the start of the day.
    AiScoringToday,
}

impl Counter {
    /// Every counter, in display order.
    pub const ALL: [Counter; 4] = [
        Counter::LeadsToday,
        Counter::Properties,
        Counter::ValuationLookupsToday,
        Counter::AiScoringToday,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeadsToday => "leads_today",
            Self::Properties => "properties",
            Self::ValuationLookupsToday => "valuation_lookups_today",
            Self::AiScoringToday => "ai_scoring_today",
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(current, limit)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageCounter {
    pub current: u32,
    pub limit: Limit,
}

impl UsageCounter {
    #[must_use]
    pub fn new(current: u32, limit: Limit) -> Self {
        Self { current, limit }
    }

    #[must_use]
    pub fn is_at_limit(&self) -> bool {
        self.limit.is_reached(self.current)
    }

    #[must_use]
    pub fn remaining(&self) -> Option<u32> {
        self.limit.remaining(self.current)
    }
}

/// Usage counters plus the messaging entitlement bit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "UsageWire", into = "UsageWire")]
pub struct Usage {
    pub leads_today: UsageCounter,
    pub properties: UsageCounter,
    pub valuation_lookups_today: UsageCounter,
    pub ai_scoring_today: UsageCounter,
    /// Messaging is an entitlement, not a counted resource.
    pub messaging_allowed: bool,
}

impl Usage {
    /// Zeroed usage with free-tier limits and messaging withheld.
    #[must_use]
    pub fn free_tier() -> Self {
        Self {
            leads_today: UsageCounter::new(0, FREE_LEADS_PER_DAY.into()),
            properties: UsageCounter::new(0, FREE_PROPERTIES.into()),
            valuation_lookups_today: UsageCounter::new(0, FREE_VALUATION_LOOKUPS_PER_DAY.into()),
            ai_scoring_today: UsageCounter::new(0, FREE_AI_SCORING_PER_DAY.into()),
            messaging_allowed: false,
        }
    }

    #[must_use]
    pub fn counter(&self, counter: Counter) -> UsageCounter {
        match counter {
            Counter::LeadsToday => self.leads_today,
            Counter::Properties => self.properties,
            Counter::ValuationLookupsToday => self.valuation_lookups_today,
            Counter::AiScoringToday => self.ai_scoring_today,
        }
    }

    fn counter_mut(&mut self, counter: Counter) -> &mut UsageCounter {
        match counter {
            Counter::LeadsToday => &mut self.leads_today,
            Counter::Properties => &mut self.properties,
            Counter::ValuationLookupsToday => &mut self.valuation_lookups_today,
            Counter::AiScoringToday => &mut self.ai_scoring_today,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageWire {
    leads_created_today: u32,
    leads_limit_per_day: Limit,
    total_properties: u32,
    properties_limit: Limit,
    valuation_lookups_today: u32,
    valuation_lookups_limit_per_day: Limit,
    ai_scoring_calls_today: u32,
    ai_scoring_limit_per_day: Limit,
    #[serde(default)]
    messaging_allowed: bool,
}

impl From<UsageWire> for Usage {
    fn from(wire: UsageWire) -> Self {
        Self {
            leads_today: UsageCounter::new(wire.leads_created_today, wire.leads_limit_per_day),
            properties: UsageCounter::new(wire.total_properties, wire.properties_limit),
            valuation_lookups_today: UsageCounter::new(
                wire.valuation_lookups_today,
                wire.valuation_lookups_limit_per_day,
            ),
            ai_scoring_today: UsageCounter::new(
                wire.ai_scoring_calls_today,
                wire.ai_scoring_limit_per_day,
            ),
            messaging_allowed: wire.messaging_allowed,
        }
    }
}

impl From<Usage> for UsageWire {
    fn from(usage: Usage) -> Self {
        Self {
            leads_created_today: usage.leads_today.current,
            leads_limit_per_day: usage.leads_today.limit,
            total_properties: usage.properties.current,
            properties_limit: usage.properties.limit,
            valuation_lookups_today: usage.valuation_lookups_today.current,
            valuation_lookups_limit_per_day: usage.valuation_lookups_today.limit,
            ai_scoring_calls_today: usage.ai_scoring_today.current,
            ai_scoring_limit_per_day: usage.ai_scoring_today.limit,
            messaging_allowed: usage.messaging_allowed,
        }
    }
}

/// Which canonical snapshot to substitute when the status read fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    /// Plain free tier. Restrictive, and the default.
    #[default]
    Free,
    /// Trial with zero days remaining, for deployments that keep new users in
    /// the app while the status endpoint is down.
    Trial,
}

impl FromStr for FallbackPolicy {
    type Err = EntitlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "trial" => Ok(Self::Trial),
            other => Err(EntitlementError::invalid_config(format!(
                "Unknown fallback policy '{}', expected 'free' or 'trial'",
                other
            ))),
        }
    }
}

/// Point-in-time plan and usage state for the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SnapshotWire", into = "SnapshotWire")]
#[must_use]
pub struct EntitlementSnapshot {
    pub plan: Plan,
    /// A paid subscription is currently active.
    pub has_active_subscription: bool,
    /// Administrative grant of pro access without a paid subscription.
    pub subscription_override: bool,
    pub is_in_trial: bool,
    pub is_trial_expired: bool,
    /// Whole days left in the trial; zero outside of a trial.
    pub days_remaining: u32,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub usage: Usage,
}

impl EntitlementSnapshot {
    /// Start building a snapshot from the free-tier defaults.
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::new()
    }

    /// The canonical snapshot substituted when the status read fails.
    pub fn fallback(policy: FallbackPolicy) -> Self {
        let base = Self {
            plan: Plan::Free,
            has_active_subscription: false,
            subscription_override: false,
            is_in_trial: false,
            is_trial_expired: false,
            days_remaining: 0,
            trial_ends_at: None,
            current_period_end: None,
            usage: Usage::free_tier(),
        };

        match policy {
            FallbackPolicy::Free => base,
            FallbackPolicy::Trial => Self {
                plan: Plan::Trial,
                is_in_trial: true,
                ..base
            },
        }
    }

    /// Check the cross-field rules a well-formed snapshot obeys.
    ///
    /// # Errors
    ///
    /// Returns `MalformedResponse` when the trial flags contradict each other.
    pub fn validate(&self) -> Result<(), EntitlementError> {
        if self.is_in_trial && self.is_trial_expired {
            return Err(EntitlementError::malformed(
                "isInTrial and isTrialExpired are both set",
            ));
        }

        if self.current_period_end.is_some() && !self.has_active_subscription {
            tracing::debug!(
                target: "dealgate::entitlements::snapshot",
                plan = %self.plan,
                "currentPeriodEnd present without an active subscription"
            );
        }

        Ok(())
    }

    /// Pro access: a paid subscription or an administrative override.
    #[must_use]
    pub fn is_pro(&self) -> bool {
        self.has_active_subscription || self.subscription_override
    }

    /// Trial countdown as of `now`.
    ///
    /// Uses `trial_ends_at` when the server sent it, capped by the server's own
    /// `days_remaining`, so the value never increases as `now` advances.
    #[must_use]
    pub fn days_remaining_at(&self, now: DateTime<Utc>) -> u32 {
        if !self.is_in_trial {
            return 0;
        }

        match self.trial_ends_at {
            Some(ends_at) => {
                let seconds_left = (ends_at - now).num_seconds();
                if seconds_left <= 0 {
                    return 0;
                }
                let days = (seconds_left + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY;
                u32::try_from(days)
                    .unwrap_or(u32::MAX)
                    .min(self.days_remaining)
            }
            None => self.days_remaining,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotWire {
    plan: Plan,
    has_active_subscription: bool,
    #[serde(default)]
    subscription_override: bool,
    #[serde(default)]
    is_in_trial: bool,
    #[serde(default)]
    is_trial_expired: bool,
    #[serde(default)]
    days_remaining: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trial_ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    current_period_end: Option<DateTime<Utc>>,
    usage: Usage,
}

impl TryFrom<SnapshotWire> for EntitlementSnapshot {
    type Error = EntitlementError;

    fn try_from(wire: SnapshotWire) -> Result<Self, Self::Error> {
        let snapshot = Self {
            plan: wire.plan,
            has_active_subscription: wire.has_active_subscription,
            subscription_override: wire.subscription_override,
            is_in_trial: wire.is_in_trial,
            is_trial_expired: wire.is_trial_expired,
            days_remaining: if wire.is_in_trial { wire.days_remaining } else { 0 },
            trial_ends_at: wire.trial_ends_at,
            current_period_end: wire.current_period_end,
            usage: wire.usage,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }
}

impl From<EntitlementSnapshot> for SnapshotWire {
    fn from(snapshot: EntitlementSnapshot) -> Self {
        Self {
            plan: snapshot.plan,
            has_active_subscription: snapshot.has_active_subscription,
            subscription_override: snapshot.subscription_override,
            is_in_trial: snapshot.is_in_trial,
            is_trial_expired: snapshot.is_trial_expired,
            days_remaining: snapshot.days_remaining,
            trial_ends_at: snapshot.trial_ends_at,
            current_period_end: snapshot.current_period_end,
            usage: snapshot.usage,
        }
    }
}

/// Builder for snapshots, mostly useful for tests and fixtures.
#[derive(Debug, Clone)]
#[must_use = "builder does nothing until you call build()"]
pub struct SnapshotBuilder {
    snapshot: EntitlementSnapshot,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self {
            snapshot: EntitlementSnapshot::fallback(FallbackPolicy::Free),
        }
    }

    pub fn plan(mut self, plan: Plan) -> Self {
        self.snapshot.plan = plan;
        self
    }

    /// Mark a paid subscription as active and switch the plan to pro.
    pub fn active_subscription(mut self, period_end: Option<DateTime<Utc>>) -> Self {
        self.snapshot.plan = Plan::Pro;
        self.snapshot.has_active_subscription = true;
        self.snapshot.current_period_end = period_end;
        self
    }

    pub fn subscription_override(mut self, granted: bool) -> Self {
        self.snapshot.subscription_override = granted;
        self
    }

    /// Put the account in an active trial.
    pub fn trial(mut self, days_remaining: u32) -> Self {
        self.snapshot.plan = Plan::Trial;
        self.snapshot.is_in_trial = true;
        self.snapshot.is_trial_expired = false;
        self.snapshot.days_remaining = days_remaining;
        self
    }

    pub fn trial_ends_at(mut self, ends_at: DateTime<Utc>) -> Self {
        self.snapshot.trial_ends_at = Some(ends_at);
        self
    }

    pub fn trial_expired(mut self) -> Self {
        self.snapshot.plan = Plan::Free;
        self.snapshot.is_in_trial = false;
        self.snapshot.is_trial_expired = true;
        self.snapshot.days_remaining = 0;
        self
    }

    pub fn usage(mut self, usage: Usage) -> Self {
        self.snapshot.usage = usage;
        self
    }

    /// Set one counter's current value and limit.
    pub fn counter(mut self, counter: Counter, current: u32, limit: Limit) -> Self {
        *self.snapshot.usage.counter_mut(counter) = UsageCounter::new(current, limit);
        self
    }

    pub fn messaging_allowed(mut self, allowed: bool) -> Self {
        self.snapshot.usage.messaging_allowed = allowed;
        self
    }

    /// Validate and return the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `MalformedResponse` if the snapshot breaks a validity rule.
    pub fn build(self) -> Result<EntitlementSnapshot, EntitlementError> {
        self.snapshot.validate()?;
        Ok(self.snapshot)
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}
