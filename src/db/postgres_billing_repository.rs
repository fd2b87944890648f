use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use time::OffsetDateTime;

use crate::db::billing_repository::BillingRepository;
use crate::models::billing::{SubscriptionStatus, SubscriptionUpdate, UserBillingRecord};

pub struct PostgresBillingRepository {
    pub pool: PgPool,
}

fn record_from_row(row: &PgRow) -> Result<UserBillingRecord, sqlx::Error> {
    let status: Option<String> = row.try_get("subscription_status")?;
    Ok(UserBillingRecord {
        user_id: row.try_get("user_id")?,
        email: row.try_get("email")?,
        stripe_customer_id: row.try_get("stripe_customer_id")?,
        stripe_subscription_id: row.try_get("stripe_subscription_id")?,
        subscription_status: SubscriptionStatus::from_db(status.as_deref()),
        current_period_end: row.try_get("current_period_end")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// The one write path for subscription state. Runs inside the caller's
/// transaction when invoked from `apply_event`.
async fn write_subscription_state(
    conn: &mut PgConnection,
    user_id: &str,
    update: &SubscriptionUpdate,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE user_billing
        SET stripe_subscription_id = $2,
            subscription_status = $3,
            current_period_end = $4,
            updated_at = now()
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .bind(update.stripe_subscription_id.as_deref())
    .bind(update.status.as_str())
    .bind(update.current_period_end)
    .execute(conn)
    .await?;

    Ok(())
}

#[async_trait]
impl BillingRepository for PostgresBillingRepository {
    async fn find_record(&self, user_id: &str) -> Result<Option<UserBillingRecord>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT user_id, email, stripe_customer_id, stripe_subscription_id,
                   subscription_status, current_period_end, created_at, updated_at
            FROM user_billing
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn get_or_create_record(
        &self,
        user_id: &str,
        email: &str,
    ) -> Result<UserBillingRecord, sqlx::Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO user_billing (user_id, email)
            VALUES ($1, $2)
            ON CONFLICT (user_id)
            DO UPDATE SET email = COALESCE(user_billing.email, EXCLUDED.email)
            RETURNING user_id, email, stripe_customer_id, stripe_subscription_id,
                      subscription_status, current_period_end, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        record_from_row(&row)
    }

    async fn set_stripe_customer_id(
        &self,
        user_id: &str,
        customer_id: &str,
    ) -> Result<(), sqlx::Error> {
        // COALESCE keeps the customer id set-once
        sqlx::query(
            r#"
            UPDATE user_billing
            SET stripe_customer_id = COALESCE(stripe_customer_id, $2),
                updated_at = now()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(customer_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_user_id_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT user_id FROM user_billing WHERE stripe_customer_id = $1")
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_user_id_by_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT user_id FROM user_billing WHERE stripe_subscription_id = $1")
            .bind(subscription_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn has_processed_event(&self, event_id: &str) -> Result<bool, sqlx::Error> {
        let exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM processed_stripe_events WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(exists.is_some())
    }

    async fn apply_event(
        &self,
        event_id: &str,
        event_type: &str,
        user_id: &str,
        update: &SubscriptionUpdate,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // The ledger insert goes first: a concurrent delivery of the same
        // event id blocks on the primary key until this transaction resolves,
        // then sees the conflict and no-ops.
        let inserted = sqlx::query(
            r#"
            INSERT INTO processed_stripe_events (event_id, event_type)
            VALUES ($1, $2)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !inserted {
            tx.rollback().await?;
            return Ok(false);
        }

        write_subscription_state(&mut *tx, user_id, update).await?;
        tx.commit().await?;

        Ok(true)
    }

    async fn apply_subscription_update(
        &self,
        user_id: &str,
        update: &SubscriptionUpdate,
    ) -> Result<(), sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        write_subscription_state(&mut *conn, user_id, update).await
    }

    async fn prune_processed_events_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM processed_stripe_events WHERE processed_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
