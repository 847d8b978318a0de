//! `SQLite` persistence for position records.
//!
//! Decimals are stored as strings and parsed exactly on the way back
//! out; a corrupted row surfaces as a persistence error instead of a
//! silently wrong price. Uses connection pooling for concurrent access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use stopguard_core::error::{Result, StopError};
use stopguard_core::position::{PositionRecord, StopLossEvent};
use stopguard_core::traits::PositionStore;

/// `SQLite`-backed [`PositionStore`].
#[derive(Clone)]
pub struct PositionDatabase {
    pool: SqlitePool,
}

impl PositionDatabase {
    /// Creates a connection pool and runs pending migrations.
    ///
    /// # Errors
    /// Returns an error if the connection or a migration fails.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(db_err)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StopError::Persistence(format!("migration failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Creates an in-memory database for testing.
    ///
    /// # Errors
    /// Returns an error if the connection fails.
    #[cfg(test)]
    pub async fn new_in_memory() -> Result<Self> {
        Self::new("sqlite::memory:", 5).await
    }
}

fn db_err(e: sqlx::Error) -> StopError {
    StopError::Persistence(e.to_string())
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal> {
    Decimal::from_str_exact(value)
        .map_err(|e| StopError::Persistence(format!("bad decimal in column {field}: {e}")))
}

fn parse_time(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StopError::Persistence(format!("bad timestamp in column {field}: {e}")))
}

fn row_to_record(row: &SqliteRow) -> Result<PositionRecord> {
    let get_text = |field: &str| -> Result<String> { row.try_get(field).map_err(db_err) };
    let get_opt = |field: &str| -> Result<Option<String>> { row.try_get(field).map_err(db_err) };

    let side = get_text("side")?
        .parse()
        .map_err(StopError::Persistence)?;
    let stop_mode = get_text("stop_mode")?
        .parse()
        .map_err(StopError::Persistence)?;

    let atr = match get_opt("atr")? {
        Some(raw) => Some(parse_decimal("atr", &raw)?),
        None => None,
    };
    let close_price = match get_opt("close_price")? {
        Some(raw) => Some(parse_decimal("close_price", &raw)?),
        None => None,
    };
    let realized_pnl = match get_opt("realized_pnl")? {
        Some(raw) => Some(parse_decimal("realized_pnl", &raw)?),
        None => None,
    };
    let close_time = match get_opt("close_time")? {
        Some(raw) => Some(parse_time("close_time", &raw)?),
        None => None,
    };

    let leverage: i64 = row.try_get("leverage").map_err(db_err)?;
    let partial_tp: i64 = row.try_get("partial_tp_executed").map_err(db_err)?;
    let closed: i64 = row.try_get("closed").map_err(db_err)?;

    Ok(PositionRecord {
        id: get_text("id")?,
        symbol: get_text("symbol")?,
        side,
        quantity: parse_decimal("quantity", &get_text("quantity")?)?,
        entry_price: parse_decimal("entry_price", &get_text("entry_price")?)?,
        entry_time: parse_time("entry_time", &get_text("entry_time")?)?,
        leverage: u32::try_from(leverage)
            .map_err(|e| StopError::Persistence(format!("bad leverage: {e}")))?,
        current_price: parse_decimal("current_price", &get_text("current_price")?)?,
        extreme_price: parse_decimal("extreme_price", &get_text("extreme_price")?)?,
        unrealized_pnl: parse_decimal("unrealized_pnl", &get_text("unrealized_pnl")?)?,
        atr,
        initial_stop_loss: parse_decimal("initial_stop_loss", &get_text("initial_stop_loss")?)?,
        current_stop_loss: parse_decimal("current_stop_loss", &get_text("current_stop_loss")?)?,
        stop_mode,
        trailing_distance: parse_decimal("trailing_distance", &get_text("trailing_distance")?)?,
        stop_order_id: get_opt("stop_order_id")?,
        partial_tp_executed: partial_tp != 0,
        open_reason: get_text("open_reason")?,
        closed: closed != 0,
        close_time,
        close_price,
        close_reason: get_opt("close_reason")?,
        realized_pnl,
    })
}

#[async_trait]
impl PositionStore for PositionDatabase {
    async fn insert(&self, record: &PositionRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO positions (
                id, symbol, side, quantity, entry_price, entry_time,
                leverage, current_price, extreme_price, unrealized_pnl,
                atr, initial_stop_loss, current_stop_loss, stop_mode,
                trailing_distance, stop_order_id, partial_tp_executed,
                open_reason, closed, close_time, close_price,
                close_reason, realized_pnl
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                    ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)
            ON CONFLICT(id) DO NOTHING
            ",
        )
        .bind(&record.id)
        .bind(&record.symbol)
        .bind(record.side.to_string())
        .bind(record.quantity.to_string())
        .bind(record.entry_price.to_string())
        .bind(record.entry_time.to_rfc3339())
        .bind(i64::from(record.leverage))
        .bind(record.current_price.to_string())
        .bind(record.extreme_price.to_string())
        .bind(record.unrealized_pnl.to_string())
        .bind(record.atr.map(|d| d.to_string()))
        .bind(record.initial_stop_loss.to_string())
        .bind(record.current_stop_loss.to_string())
        .bind(record.stop_mode.to_string())
        .bind(record.trailing_distance.to_string())
        .bind(record.stop_order_id.as_deref())
        .bind(i64::from(record.partial_tp_executed))
        .bind(&record.open_reason)
        .bind(i64::from(record.closed))
        .bind(record.close_time.map(|t| t.to_rfc3339()))
        .bind(record.close_price.map(|d| d.to_string()))
        .bind(record.close_reason.as_deref())
        .bind(record.realized_pnl.map(|d| d.to_string()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn update(&self, record: &PositionRecord) -> Result<()> {
        sqlx::query(
            r"
            UPDATE positions SET
                symbol = ?2, side = ?3, quantity = ?4, entry_price = ?5,
                entry_time = ?6, leverage = ?7, current_price = ?8,
                extreme_price = ?9, unrealized_pnl = ?10, atr = ?11,
                initial_stop_loss = ?12, current_stop_loss = ?13,
                stop_mode = ?14, trailing_distance = ?15,
                stop_order_id = ?16, partial_tp_executed = ?17,
                open_reason = ?18, closed = ?19, close_time = ?20,
                close_price = ?21, close_reason = ?22, realized_pnl = ?23
            WHERE id = ?1
            ",
        )
        .bind(&record.id)
        .bind(&record.symbol)
        .bind(record.side.to_string())
        .bind(record.quantity.to_string())
        .bind(record.entry_price.to_string())
        .bind(record.entry_time.to_rfc3339())
        .bind(i64::from(record.leverage))
        .bind(record.current_price.to_string())
        .bind(record.extreme_price.to_string())
        .bind(record.unrealized_pnl.to_string())
        .bind(record.atr.map(|d| d.to_string()))
        .bind(record.initial_stop_loss.to_string())
        .bind(record.current_stop_loss.to_string())
        .bind(record.stop_mode.to_string())
        .bind(record.trailing_distance.to_string())
        .bind(record.stop_order_id.as_deref())
        .bind(i64::from(record.partial_tp_executed))
        .bind(&record.open_reason)
        .bind(i64::from(record.closed))
        .bind(record.close_time.map(|t| t.to_rfc3339()))
        .bind(record.close_price.map(|d| d.to_string()))
        .bind(record.close_reason.as_deref())
        .bind(record.realized_pnl.map(|d| d.to_string()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<Option<PositionRecord>> {
        let row = sqlx::query("SELECT * FROM positions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => Ok(Some(row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn open_positions(&self) -> Result<Vec<PositionRecord>> {
        let rows = sqlx::query("SELECT * FROM positions WHERE closed = 0 ORDER BY entry_time")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter().map(row_to_record).collect()
    }

    async fn append_stop_event(&self, position_id: &str, event: &StopLossEvent) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO stop_loss_events
                (position_id, timestamp, old_stop, new_stop, reason, initiator)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(position_id)
        .bind(event.timestamp.to_rfc3339())
        .bind(event.old_stop.to_string())
        .bind(event.new_stop.to_string())
        .bind(&event.reason)
        .bind(event.initiator.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use stopguard_core::position::{Position, Side, StopInitiator, StopMode};

    fn sample_record() -> PositionRecord {
        Position::open(
            "pos-1",
            "BTC/USDT",
            Side::Long,
            dec!(0.5),
            dec!(67000),
            dec!(64990),
            10,
            "breakout entry",
            Some(dec!(850)),
        )
        .to_record()
    }

    #[tokio::test]
    async fn round_trips_an_open_position() {
        let db = PositionDatabase::new_in_memory().await.unwrap();
        let record = sample_record();
        db.insert(&record).await.unwrap();

        let loaded = db.fetch("pos-1").await.unwrap().unwrap();
        assert_eq!(loaded.symbol, "BTCUSDT");
        assert_eq!(loaded.side, Side::Long);
        assert_eq!(loaded.quantity, dec!(0.5));
        assert_eq!(loaded.entry_price, dec!(67000));
        assert_eq!(loaded.atr, Some(dec!(850)));
        assert_eq!(loaded.stop_mode, StopMode::Fixed);
        assert!(!loaded.closed);
    }

    #[tokio::test]
    async fn insert_is_idempotent() {
        let db = PositionDatabase::new_in_memory().await.unwrap();
        let record = sample_record();
        db.insert(&record).await.unwrap();
        db.insert(&record).await.unwrap();

        assert_eq!(db.open_positions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_persists_stop_progression_and_close() {
        let db = PositionDatabase::new_in_memory().await.unwrap();
        let mut record = sample_record();
        db.insert(&record).await.unwrap();

        record.current_stop_loss = dec!(67000);
        record.stop_mode = StopMode::Breakeven;
        record.stop_order_id = Some("987654".to_string());
        db.update(&record).await.unwrap();

        let loaded = db.fetch("pos-1").await.unwrap().unwrap();
        assert_eq!(loaded.current_stop_loss, dec!(67000));
        assert_eq!(loaded.stop_mode, StopMode::Breakeven);
        assert_eq!(loaded.stop_order_id.as_deref(), Some("987654"));

        record.mark_closed(dec!(66850), "stop filled", dec!(-75));
        db.update(&record).await.unwrap();

        let loaded = db.fetch("pos-1").await.unwrap().unwrap();
        assert!(loaded.closed);
        assert_eq!(loaded.close_price, Some(dec!(66850)));
        assert_eq!(loaded.close_reason.as_deref(), Some("stop filled"));
        assert_eq!(loaded.realized_pnl, Some(dec!(-75)));
        assert!(db.open_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_positions_skips_closed_records() {
        let db = PositionDatabase::new_in_memory().await.unwrap();
        let mut a = sample_record();
        db.insert(&a).await.unwrap();

        let mut b = sample_record();
        b.id = "pos-2".to_string();
        b.symbol = "ETHUSDT".to_string();
        db.insert(&b).await.unwrap();

        a.mark_closed(dec!(66000), "manual", dec!(-500));
        db.update(&a).await.unwrap();

        let open = db.open_positions().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "pos-2");
    }

    #[tokio::test]
    async fn stop_events_append() {
        let db = PositionDatabase::new_in_memory().await.unwrap();
        db.insert(&sample_record()).await.unwrap();

        let event = StopLossEvent {
            timestamp: chrono::Utc::now(),
            old_stop: dec!(64990),
            new_stop: dec!(67000),
            reason: "breakeven reached".to_string(),
            initiator: StopInitiator::Policy,
        };
        db.append_stop_event("pos-1", &event).await.unwrap();
        db.append_stop_event("pos-1", &event).await.unwrap();

        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM stop_loss_events WHERE position_id = 'pos-1'",
        )
        .fetch_one(&db.pool)
        .await
        .unwrap();
        assert_eq!(count.0, 2);
    }
}
