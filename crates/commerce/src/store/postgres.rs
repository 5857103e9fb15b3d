//! `PostgreSQL` implementation of [`CommerceStore`].
//!
//! Documents (carts, sessions, orders, reconciliation logs, products) are
//! persisted as JSONB with the columns needed for filtering and keyset
//! sorting lifted out. Stock lives in a plain integer column; decrement
//! idempotency comes from the `stock_movements` table, written in the same
//! transaction as the stock update.
//!
//! Queries use the runtime sqlx API; no live database is needed at build
//! time.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use streetline_core::{CheckoutSessionId, OrderId, OrderStatus, ProductId, Sku, UserId};

use crate::models::{Cart, CheckoutSession, InventoryLevel, Order, Product, ReconciliationLog};
use crate::store::{
    CommerceStore, CursorValue, DecrementOutcome, SortBoundary, SortDirection, StoreError,
    StoredSort,
};

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Run the embedded schema migrations.
///
/// # Errors
///
/// Returns `sqlx::migrate::MigrateError` if a migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// `PostgreSQL` commerce store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_doc<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::DataCorruption(e.to_string()))
}

fn from_doc<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::DataCorruption(e.to_string()))
}

fn qty_to_i32(qty: u32) -> Result<i32, StoreError> {
    i32::try_from(qty).map_err(|_| StoreError::DataCorruption(format!("quantity {qty} overflows")))
}

#[async_trait]
impl CommerceStore for PostgresStore {
    async fn insert_product(&self, product: &Product) -> Result<(), StoreError> {
        let doc = to_doc(product)?;
        sqlx::query(
            r"
            INSERT INTO products (id, name, category, created_at, doc)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(&product.category)
        .bind(product.created_at)
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::Conflict(format!("product {} already exists", product.id));
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query("SELECT doc FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| from_doc(r.try_get::<Value, _>("doc").map_err(StoreError::Database)?))
            .transpose()
    }

    async fn product_page(
        &self,
        sort: StoredSort,
        direction: SortDirection,
        after: Option<&SortBoundary>,
        limit: usize,
    ) -> Result<Vec<Product>, StoreError> {
        let column = match sort {
            StoredSort::CreatedAt => "created_at",
            StoredSort::Name => "name",
        };
        let (dir, cmp) = match direction {
            SortDirection::Asc => ("ASC", ">"),
            SortDirection::Desc => ("DESC", "<"),
        };

        let rows = if let Some(boundary) = after {
            let sql = format!(
                "SELECT doc FROM products WHERE ({column}, id) {cmp} ($1, $2) \
                 ORDER BY {column} {dir}, id {dir} LIMIT $3"
            );
            let query = sqlx::query(&sql);
            let query = match &boundary.value {
                CursorValue::Timestamp(ts) => query.bind(*ts),
                CursorValue::Text(text) => query.bind(text.clone()),
            };
            query
                .bind(boundary.id.as_uuid())
                .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                .fetch_all(&self.pool)
                .await?
        } else {
            let sql = format!(
                "SELECT doc FROM products ORDER BY {column} {dir}, id {dir} LIMIT $1"
            );
            sqlx::query(&sql)
                .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                .fetch_all(&self.pool)
                .await?
        };

        rows.into_iter()
            .map(|r| from_doc(r.try_get::<Value, _>("doc").map_err(StoreError::Database)?))
            .collect()
    }

    async fn product_count(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM products")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count").map_err(StoreError::Database)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn inventory_level(&self, sku: &Sku) -> Result<Option<InventoryLevel>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT sku, product_id, variant_id, size, stock
            FROM inventory_levels
            WHERE sku = $1
            ",
        )
        .bind(sku.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let sku_raw: String = r.try_get("sku").map_err(StoreError::Database)?;
            let size_raw: String = r.try_get("size").map_err(StoreError::Database)?;
            let stock: i32 = r.try_get("stock").map_err(StoreError::Database)?;
            Ok(InventoryLevel {
                sku: Sku::parse(&sku_raw).map_err(|e| StoreError::DataCorruption(e.to_string()))?,
                product_id: ProductId::new(r.try_get("product_id").map_err(StoreError::Database)?),
                variant_id: streetline_core::VariantId::new(
                    r.try_get("variant_id").map_err(StoreError::Database)?,
                ),
                size: size_raw.parse().map_err(StoreError::DataCorruption)?,
                stock: u32::try_from(stock).unwrap_or(0),
            })
        })
        .transpose()
    }

    async fn upsert_inventory_level(&self, level: &InventoryLevel) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO inventory_levels (sku, product_id, variant_id, size, stock)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (sku) DO UPDATE SET
                product_id = EXCLUDED.product_id,
                variant_id = EXCLUDED.variant_id,
                size = EXCLUDED.size,
                stock = EXCLUDED.stock
            ",
        )
        .bind(level.sku.as_str())
        .bind(level.product_id.as_uuid())
        .bind(level.variant_id.as_uuid())
        .bind(level.size.label())
        .bind(qty_to_i32(level.stock)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_decrement(
        &self,
        key: CheckoutSessionId,
        sku: &Sku,
        qty: u32,
    ) -> Result<DecrementOutcome, StoreError> {
        let qty_i32 = qty_to_i32(qty)?;
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r"
            INSERT INTO stock_movements (recon_key, sku, qty)
            VALUES ($1, $2, $3)
            ON CONFLICT (recon_key, sku) DO NOTHING
            ",
        )
        .bind(key.as_uuid())
        .bind(sku.as_str())
        .bind(qty_i32)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(DecrementOutcome::AlreadyApplied);
        }

        let updated = sqlx::query(
            r"
            UPDATE inventory_levels
            SET stock = stock - $2
            WHERE sku = $1 AND stock >= $2
            ",
        )
        .bind(sku.as_str())
        .bind(qty_i32)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            let row = sqlx::query("SELECT stock FROM inventory_levels WHERE sku = $1")
                .bind(sku.as_str())
                .fetch_optional(&self.pool)
                .await?;
            return match row {
                None => Err(StoreError::NotFound),
                Some(r) => {
                    let stock: i32 = r.try_get("stock").map_err(StoreError::Database)?;
                    Ok(DecrementOutcome::Insufficient {
                        available: u32::try_from(stock).unwrap_or(0),
                    })
                }
            };
        }

        tx.commit().await?;
        Ok(DecrementOutcome::Applied)
    }

    async fn release_decrement(
        &self,
        key: CheckoutSessionId,
        sku: &Sku,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r"
            DELETE FROM stock_movements
            WHERE recon_key = $1 AND sku = $2
            RETURNING qty
            ",
        )
        .bind(key.as_uuid())
        .bind(sku.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(false);
        };
        let qty: i32 = row.try_get("qty").map_err(StoreError::Database)?;

        sqlx::query("UPDATE inventory_levels SET stock = stock + $2 WHERE sku = $1")
            .bind(sku.as_str())
            .bind(qty)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn cart(&self, user_id: UserId) -> Result<Option<Cart>, StoreError> {
        let row = sqlx::query("SELECT doc FROM carts WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| from_doc(r.try_get::<Value, _>("doc").map_err(StoreError::Database)?))
            .transpose()
    }

    async fn put_cart(&self, cart: &Cart) -> Result<(), StoreError> {
        let doc = to_doc(cart)?;
        sqlx::query(
            r"
            INSERT INTO carts (user_id, doc, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE SET doc = EXCLUDED.doc, updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(cart.user_id.as_uuid())
        .bind(doc)
        .bind(cart.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_cart(&self, user_id: UserId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM carts WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn checkout_session(
        &self,
        user_id: UserId,
    ) -> Result<Option<CheckoutSession>, StoreError> {
        let row = sqlx::query("SELECT doc FROM checkout_sessions WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| from_doc(r.try_get::<Value, _>("doc").map_err(StoreError::Database)?))
            .transpose()
    }

    async fn put_checkout_session(&self, session: &CheckoutSession) -> Result<(), StoreError> {
        let doc = to_doc(session)?;
        sqlx::query(
            r"
            INSERT INTO checkout_sessions (user_id, doc, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE SET doc = EXCLUDED.doc, updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(session.user_id.as_uuid())
        .bind(doc)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_checkout_session(&self, user_id: UserId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM checkout_sessions WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let doc = to_doc(order)?;
        sqlx::query(
            r"
            INSERT INTO orders (id, user_id, status, created_at, doc)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.status.to_string())
        .bind(order.created_at)
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::Conflict(format!("order {} already exists", order.id));
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query("SELECT doc FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| from_doc(r.try_get::<Value, _>("doc").map_err(StoreError::Database)?))
            .transpose()
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT doc FROM orders
            WHERE user_id = $1
            ORDER BY created_at DESC
            ",
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| from_doc(r.try_get::<Value, _>("doc").map_err(StoreError::Database)?))
            .collect()
    }

    async fn transition_order_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE orders
            SET status = $3, doc = jsonb_set(doc, '{status}', to_jsonb($3::text))
            WHERE id = $1 AND status = $2
            ",
        )
        .bind(id.as_uuid())
        .bind(from.to_string())
        .bind(to.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reconciliation(
        &self,
        key: CheckoutSessionId,
    ) -> Result<Option<ReconciliationLog>, StoreError> {
        let row = sqlx::query("SELECT doc FROM reconciliations WHERE key = $1")
            .bind(key.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| from_doc(r.try_get::<Value, _>("doc").map_err(StoreError::Database)?))
            .transpose()
    }

    async fn create_reconciliation(
        &self,
        log: &ReconciliationLog,
    ) -> Result<ReconciliationLog, StoreError> {
        let doc = to_doc(log)?;
        let phase = to_doc(&log.phase)?;
        let phase_text = phase.as_str().unwrap_or("reserving").to_string();
        // The no-op DO UPDATE makes RETURNING yield the existing row on
        // conflict, so winner and loser both get the winning log in one
        // atomic statement.
        let row = sqlx::query(
            r"
            INSERT INTO reconciliations (key, phase, doc, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key) DO UPDATE SET key = reconciliations.key
            RETURNING doc
            ",
        )
        .bind(log.key.as_uuid())
        .bind(phase_text)
        .bind(doc)
        .bind(log.updated_at)
        .fetch_one(&self.pool)
        .await?;
        from_doc(row.try_get::<Value, _>("doc").map_err(StoreError::Database)?)
    }

    async fn put_reconciliation(&self, log: &ReconciliationLog) -> Result<(), StoreError> {
        let doc = to_doc(log)?;
        let phase = to_doc(&log.phase)?;
        let phase_text = phase.as_str().unwrap_or("reserving").to_string();
        sqlx::query(
            r"
            INSERT INTO reconciliations (key, phase, doc, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key) DO UPDATE SET
                phase = EXCLUDED.phase,
                doc = EXCLUDED.doc,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(log.key.as_uuid())
        .bind(phase_text)
        .bind(doc)
        .bind(log.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_reconciliation(&self, key: CheckoutSessionId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM reconciliations WHERE key = $1")
            .bind(key.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
