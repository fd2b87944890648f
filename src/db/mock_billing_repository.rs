#![allow(dead_code)]
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

use crate::db::billing_repository::BillingRepository;
use crate::models::billing::{SubscriptionStatus, SubscriptionUpdate, UserBillingRecord};

/// In-memory stand-in for the Postgres repository. Mutation counters let
/// tests assert exactly-once effects.
#[derive(Clone, Default)]
pub struct MockBillingRepository {
    pub records: Arc<Mutex<HashMap<String, UserBillingRecord>>>,
    pub processed_events: Arc<Mutex<HashSet<String>>>,
    pub state_writes: Arc<Mutex<usize>>,
    pub should_fail: Arc<Mutex<bool>>,
}

impl MockBillingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(self, record: UserBillingRecord) -> Self {
        self.records
            .lock()
            .unwrap()
            .insert(record.user_id.clone(), record);
        self
    }

    pub fn seed_record(
        user_id: &str,
        customer_id: Option<&str>,
        subscription_id: Option<&str>,
        status: SubscriptionStatus,
    ) -> UserBillingRecord {
        let now = OffsetDateTime::now_utc();
        UserBillingRecord {
            user_id: user_id.to_string(),
            email: Some(format!("{user_id}@example.test")),
            stripe_customer_id: customer_id.map(str::to_string),
            stripe_subscription_id: subscription_id.map(str::to_string),
            subscription_status: status,
            current_period_end: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn record(&self, user_id: &str) -> Option<UserBillingRecord> {
        self.records.lock().unwrap().get(user_id).cloned()
    }

    pub fn processed_event_count(&self) -> usize {
        self.processed_events.lock().unwrap().len()
    }

    fn fail_if_requested(&self) -> Result<(), sqlx::Error> {
        if *self.should_fail.lock().unwrap() {
            return Err(sqlx::Error::Protocol("mock billing repo failure".into()));
        }
        Ok(())
    }

    fn write_state(&self, user_id: &str, update: &SubscriptionUpdate) {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get_mut(user_id) {
            record.stripe_subscription_id = update.stripe_subscription_id.clone();
            record.subscription_status = update.status;
            record.current_period_end = update.current_period_end;
            record.updated_at = OffsetDateTime::now_utc();
            *self.state_writes.lock().unwrap() += 1;
        }
    }
}

#[async_trait]
impl BillingRepository for MockBillingRepository {
    async fn find_record(&self, user_id: &str) -> Result<Option<UserBillingRecord>, sqlx::Error> {
        self.fail_if_requested()?;
        Ok(self.record(user_id))
    }

    async fn get_or_create_record(
        &self,
        user_id: &str,
        email: &str,
    ) -> Result<UserBillingRecord, sqlx::Error> {
        self.fail_if_requested()?;
        let mut records = self.records.lock().unwrap();
        let record = records.entry(user_id.to_string()).or_insert_with(|| {
            let now = OffsetDateTime::now_utc();
            UserBillingRecord {
                user_id: user_id.to_string(),
                email: Some(email.to_string()),
                stripe_customer_id: None,
                stripe_subscription_id: None,
                subscription_status: SubscriptionStatus::Free,
                current_period_end: None,
                created_at: now,
                updated_at: now,
            }
        });
        if record.email.is_none() {
            record.email = Some(email.to_string());
        }
        Ok(record.clone())
    }

    async fn set_stripe_customer_id(
        &self,
        user_id: &str,
        customer_id: &str,
    ) -> Result<(), sqlx::Error> {
        self.fail_if_requested()?;
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get_mut(user_id) {
            if record.stripe_customer_id.is_none() {
                record.stripe_customer_id = Some(customer_id.to_string());
            }
        }
        Ok(())
    }

    async fn find_user_id_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        self.fail_if_requested()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.stripe_customer_id.as_deref() == Some(customer_id))
            .map(|r| r.user_id.clone()))
    }

    async fn find_user_id_by_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        self.fail_if_requested()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.stripe_subscription_id.as_deref() == Some(subscription_id))
            .map(|r| r.user_id.clone()))
    }

    async fn has_processed_event(&self, event_id: &str) -> Result<bool, sqlx::Error> {
        self.fail_if_requested()?;
        Ok(self.processed_events.lock().unwrap().contains(event_id))
    }

    async fn apply_event(
        &self,
        event_id: &str,
        _event_type: &str,
        user_id: &str,
        update: &SubscriptionUpdate,
    ) -> Result<bool, sqlx::Error> {
        self.fail_if_requested()?;
        let inserted = self
            .processed_events
            .lock()
            .unwrap()
            .insert(event_id.to_string());
        if !inserted {
            return Ok(false);
        }
        self.write_state(user_id, update);
        Ok(true)
    }

    async fn apply_subscription_update(
        &self,
        user_id: &str,
        update: &SubscriptionUpdate,
    ) -> Result<(), sqlx::Error> {
        self.fail_if_requested()?;
        self.write_state(user_id, update);
        Ok(())
    }

    async fn prune_processed_events_before(
        &self,
        _cutoff: OffsetDateTime,
    ) -> Result<u64, sqlx::Error> {
        self.fail_if_requested()?;
        Ok(0)
    }
}
