//! Capability gates derived from a snapshot.
//!
//! Every predicate is pure and total over `Option<&EntitlementSnapshot>`.
//! `None` means nobody is signed in; every gate is then at its most
//! restrictive value.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::snapshot::{Counter, EntitlementSnapshot, Plan};

/// The single state that describes an account at a given time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    /// Paid subscription or administrative override.
    Pro,
    /// Trial still running.
    TrialActive { days_remaining: u32 },
    /// Trial ended without converting.
    TrialExpired,
    /// Permanently free.
    Free,
}

impl AccountState {
    /// Classify a snapshot. Pro takes precedence over any trial flags.
    #[must_use]
    pub fn of(snapshot: &EntitlementSnapshot) -> Self {
        if snapshot.is_pro() {
            Self::Pro
        } else if snapshot.is_in_trial {
            Self::TrialActive {
                days_remaining: snapshot.days_remaining,
            }
        } else if snapshot.is_trial_expired {
            Self::TrialExpired
        } else {
            Self::Free
        }
    }
}

#[must_use]
pub fn is_pro(snapshot: Option<&EntitlementSnapshot>) -> bool {
    snapshot.is_some_and(EntitlementSnapshot::is_pro)
}

#[must_use]
pub fn is_in_trial(snapshot: Option<&EntitlementSnapshot>) -> bool {
    snapshot.is_some_and(|s| s.is_in_trial)
}

#[must_use]
pub fn is_trial_expired(snapshot: Option<&EntitlementSnapshot>) -> bool {
    snapshot.is_some_and(|s| s.is_trial_expired)
}

/// Pro users and active trials may use the app.
#[must_use]
pub fn can_access_app(snapshot: Option<&EntitlementSnapshot>) -> bool {
    is_pro(snapshot) || is_in_trial(snapshot)
}

/// Pro users are never blocked by nominal limits; everyone else needs
/// `current < limit`.
#[must_use]
pub fn can_consume(counter: Counter, snapshot: Option<&EntitlementSnapshot>) -> bool {
    match snapshot {
        Some(s) => s.is_pro() || !s.usage.counter(counter).is_at_limit(),
        None => false,
    }
}

/// Messaging follows its own entitlement bit, not pro status.
#[must_use]
pub fn can_access_messaging(snapshot: Option<&EntitlementSnapshot>) -> bool {
    snapshot.is_some_and(|s| s.usage.messaging_allowed)
}

/// Units left on a counter. `None` means no cap applies.
#[must_use]
pub fn remaining(counter: Counter, snapshot: Option<&EntitlementSnapshot>) -> Option<u32> {
    match snapshot {
        Some(s) if s.is_pro() => None,
        Some(s) => s.usage.counter(counter).remaining(),
        None => Some(0),
    }
}

/// Gate set over a shared snapshot.
///
/// Cheap to clone; holds the same `Arc` the store hands out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Gates {
    snapshot: Option<Arc<EntitlementSnapshot>>,
}

impl Gates {
    #[must_use]
    pub fn new(snapshot: Option<Arc<EntitlementSnapshot>>) -> Self {
        Self { snapshot }
    }

    /// Gates for the signed-out state.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<&EntitlementSnapshot> {
        self.snapshot.as_deref()
    }

    #[must_use]
    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    #[must_use]
    pub fn plan(&self) -> Option<Plan> {
        self.snapshot().map(|s| s.plan)
    }

    #[must_use]
    pub fn account_state(&self) -> Option<AccountState> {
        self.snapshot().map(AccountState::of)
    }

    #[must_use]
    pub fn is_pro(&self) -> bool {
        is_pro(self.snapshot())
    }

    #[must_use]
    pub fn is_in_trial(&self) -> bool {
        is_in_trial(self.snapshot())
    }

    #[must_use]
    pub fn is_trial_expired(&self) -> bool {
        is_trial_expired(self.snapshot())
    }

    #[must_use]
    pub fn can_access_app(&self) -> bool {
        can_access_app(self.snapshot())
    }

    #[must_use]
    pub fn can_consume(&self, counter: Counter) -> bool {
        can_consume(counter, self.snapshot())
    }

    #[must_use]
    pub fn can_create_lead(&self) -> bool {
        self.can_consume(Counter::LeadsToday)
    }

    #[must_use]
    pub fn can_add_property(&self) -> bool {
        self.can_consume(Counter::Properties)
    }

    #[must_use]
    pub fn can_lookup_valuation(&self) -> bool {
        self.can_consume(Counter::ValuationLookupsToday)
    }

    #[must_use]
    pub fn can_score_with_ai(&self) -> bool {
        self.can_consume(Counter::AiScoringToday)
    }

    #[must_use]
    pub fn can_access_messaging(&self) -> bool {
        can_access_messaging(self.snapshot())
    }

    #[must_use]
    pub fn remaining(&self, counter: Counter) -> Option<u32> {
        remaining(counter, self.snapshot())
    }

    /// Trial countdown as of `now`; zero outside a trial.
    #[must_use]
    pub fn trial_days_remaining(&self, now: DateTime<Utc>) -> u32 {
        self.snapshot().map_or(0, |s| s.days_remaining_at(now))
    }

    /// Whether the UI should nudge the user toward upgrading: a signed-in,
    /// non-pro account whose trial has run out or that hit any limit.
    #[must_use]
    pub fn show_upgrade_prompt(&self) -> bool {
        match self.snapshot() {
            Some(s) if !s.is_pro() => {
                s.is_trial_expired || Counter::ALL.iter().any(|c| !self.can_consume(*c))
            }
            _ => false,
        }
    }
}

impl From<Option<Arc<EntitlementSnapshot>>> for Gates {
    fn from(snapshot: Option<Arc<EntitlementSnapshot>>) -> Self {
        Self::new(snapshot)
    }
}

impl From<EntitlementSnapshot> for Gates {
    fn from(snapshot: EntitlementSnapshot) -> Self {
        Self::new(Some(Arc::new(snapshot)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlements::snapshot::{FallbackPolicy, Limit, Usage, UsageCounter};
    use proptest::prelude::*;

    fn limit(max: u32) -> Limit {
        Limit::new(max).unwrap()
    }

    fn free_with_leads(current: u32) -> Gates {
        EntitlementSnapshot::builder()
            .counter(Counter::LeadsToday, current, limit(20))
            .build()
            .unwrap()
            .into()
    }

    #[test]
    fn test_free_user_under_lead_limit() {
        assert!(free_with_leads(5).can_create_lead());
        assert_eq!(free_with_leads(5).remaining(Counter::LeadsToday), Some(15));
    }

    #[test]
    fn test_free_user_at_lead_limit() {
        let gates = free_with_leads(20);
        assert!(!gates.can_create_lead());
        assert!(gates.show_upgrade_prompt());
    }

    #[test]
    fn test_pro_user_over_nominal_limit() {
        let gates: Gates = EntitlementSnapshot::builder()
            .active_subscription(None)
            .counter(Counter::LeadsToday, 50, limit(20))
            .build()
            .unwrap()
            .into();

        assert!(gates.is_pro());
        assert!(gates.can_create_lead());
        assert!(gates.can_access_app());
        assert_eq!(gates.remaining(Counter::LeadsToday), None);
        assert!(!gates.show_upgrade_prompt());
    }

    #[test]
    fn test_override_grants_pro_without_subscription() {
        let gates: Gates = EntitlementSnapshot::builder()
            .subscription_override(true)
            .counter(Counter::AiScoringToday, 10, limit(10))
            .build()
            .unwrap()
            .into();

        assert!(gates.is_pro());
        assert!(gates.can_score_with_ai());
        assert_eq!(gates.account_state(), Some(AccountState::Pro));
    }

    #[test]
    fn test_unlimited_counter_never_blocks() {
        let gates: Gates = EntitlementSnapshot::builder()
            .counter(Counter::Properties, 10_000, Limit::Unlimited)
            .build()
            .unwrap()
            .into();

        assert!(gates.can_add_property());
        assert_eq!(gates.remaining(Counter::Properties), None);
    }

    #[test]
    fn test_messaging_independent_of_pro() {
        let pro_without_messaging: Gates = EntitlementSnapshot::builder()
            .active_subscription(None)
            .messaging_allowed(false)
            .build()
            .unwrap()
            .into();
        assert!(!pro_without_messaging.can_access_messaging());

        let trial_with_messaging: Gates = EntitlementSnapshot::builder()
            .trial(5)
            .messaging_allowed(true)
            .build()
            .unwrap()
            .into();
        assert!(trial_with_messaging.can_access_messaging());
    }

    #[test]
    fn test_trial_states() {
        let active: Gates = EntitlementSnapshot::builder().trial(4).build().unwrap().into();
        assert!(active.is_in_trial());
        assert!(active.can_access_app());
        assert_eq!(
            active.account_state(),
            Some(AccountState::TrialActive { days_remaining: 4 })
        );

        let expired: Gates = EntitlementSnapshot::builder()
            .trial_expired()
            .build()
            .unwrap()
            .into();
        assert!(expired.is_trial_expired());
        assert!(!expired.can_access_app());
        assert!(expired.show_upgrade_prompt());
        assert_eq!(expired.account_state(), Some(AccountState::TrialExpired));
    }

    #[test]
    fn test_plain_free_cannot_access_app() {
        let gates: Gates = EntitlementSnapshot::fallback(FallbackPolicy::Free).into();
        assert!(!gates.can_access_app());
        assert!(gates.can_create_lead());
        assert_eq!(gates.account_state(), Some(AccountState::Free));
        assert!(!gates.show_upgrade_prompt());
    }

    #[test]
    fn test_no_snapshot_is_most_restrictive() {
        let gates = Gates::none();

        assert!(!gates.has_snapshot());
        assert!(!gates.is_pro());
        assert!(!gates.is_in_trial());
        assert!(!gates.can_access_app());
        assert!(!gates.can_access_messaging());
        for counter in Counter::ALL {
            assert!(!gates.can_consume(counter));
            assert_eq!(gates.remaining(counter), Some(0));
        }
        assert_eq!(gates.account_state(), None);
        assert_eq!(gates.trial_days_remaining(Utc::now()), 0);
        assert!(!gates.show_upgrade_prompt());
    }

    fn arb_limit() -> impl Strategy<Value = Limit> {
        prop_oneof![
            Just(Limit::Unlimited),
            (1u32..200).prop_map(|max| Limit::new(max).unwrap()),
        ]
    }

    fn arb_counter() -> impl Strategy<Value = UsageCounter> {
        (0u32..250, arb_limit()).prop_map(|(current, limit)| UsageCounter::new(current, limit))
    }

    fn arb_snapshot() -> impl Strategy<Value = EntitlementSnapshot> {
        (
            any::<bool>(),
            any::<bool>(),
            0u8..3,
            (arb_counter(), arb_counter(), arb_counter(), arb_counter()),
            any::<bool>(),
        )
            .prop_map(|(active, override_granted, trial, counters, messaging)| {
                let base = EntitlementSnapshot::fallback(FallbackPolicy::Free);
                EntitlementSnapshot {
                    has_active_subscription: active,
                    subscription_override: override_granted,
                    is_in_trial: trial == 1,
                    is_trial_expired: trial == 2,
                    days_remaining: if trial == 1 { 7 } else { 0 },
                    usage: Usage {
                        leads_today: counters.0,
                        properties: counters.1,
                        valuation_lookups_today: counters.2,
                        ai_scoring_today: counters.3,
                        messaging_allowed: messaging,
                    },
                    ..base
                }
            })
    }

    proptest! {
        #[test]
        fn prop_is_pro_ignores_usage(snapshot in arb_snapshot()) {
            prop_assert_eq!(
                is_pro(Some(&snapshot)),
                snapshot.has_active_subscription || snapshot.subscription_override
            );
        }

        #[test]
        fn prop_can_consume_matches_limit(snapshot in arb_snapshot()) {
            for counter in Counter::ALL {
                let usage = snapshot.usage.counter(counter);
                let under = match usage.limit.max() {
                    Some(max) => usage.current < max,
                    None => true,
                };
                prop_assert_eq!(
                    can_consume(counter, Some(&snapshot)),
                    snapshot.is_pro() || under
                );
            }
        }

        #[test]
        fn prop_exactly_one_account_state(snapshot in arb_snapshot()) {
            let state = AccountState::of(&snapshot);
            let matches = [
                state == AccountState::Pro,
                matches!(state, AccountState::TrialActive { .. }),
                state == AccountState::TrialExpired,
                state == AccountState::Free,
            ];
            prop_assert_eq!(matches.iter().filter(|m| **m).count(), 1);
            prop_assert_eq!(state == AccountState::Pro, snapshot.is_pro());
        }
    }
}
