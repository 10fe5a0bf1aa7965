//! Entitlement gate
//!
//! Answers one question per request: does this user currently hold a trial or
//! paid subscription? Nothing is cached; every call reads the ledger.

use super::{BillingError, SubscriptionLedger};
use crate::UserId;

#[derive(Clone)]
pub struct EntitlementGate {
    ledger: SubscriptionLedger,
}

impl EntitlementGate {
    pub fn new(ledger: SubscriptionLedger) -> Self {
        Self { ledger }
    }

    /// Whether `owner` may access premium content right now
    pub async fn has_access(&self, owner: UserId) -> Result<bool, BillingError> {
        Ok(self.ledger.current_entitlement(owner).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::LedgerPolicy;
    use crate::clock::ManualClock;
    use crate::models::subscription::Plan;
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_access_follows_ledger() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ledger = SubscriptionLedger::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            LedgerPolicy::default(),
        );
        let gate = EntitlementGate::new(ledger.clone());

        assert!(!gate.has_access(1).await.unwrap());

        ledger.start_trial(1, Plan::Basic).await.unwrap();
        assert!(gate.has_access(1).await.unwrap());

        clock.advance(Duration::days(7) + Duration::seconds(1));
        assert!(!gate.has_access(1).await.unwrap());
    }
}
