//! In-memory registry of actively-managed positions.
//!
//! A position exists here iff the manager believes it is currently
//! open on the exchange. The map is guarded by a reader/writer lock
//! held only for the map operation itself — never across network
//! calls. A separate per-symbol mutex table provides the
//! symbol-scoped critical section that serializes whole
//! read→decide→place→persist sequences for one symbol without
//! blocking unrelated symbols.

use std::collections::HashMap;
use std::sync::Arc;

use stopguard_core::position::Position;
use stopguard_core::symbol;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

pub struct PositionRegistry {
    positions: RwLock<HashMap<String, Position>>,
    symbol_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Default for PositionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            symbol_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires the symbol-scoped guard. All mutating lifecycle
    /// operations for a symbol take this before touching the position,
    /// so conflicting cancel/place sequences cannot interleave.
    pub async fn symbol_guard(&self, sym: &str) -> OwnedMutexGuard<()> {
        let key = symbol::normalize(sym);
        let lock = {
            let mut locks = self.symbol_locks.lock().await;
            Arc::clone(locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        lock.lock_owned().await
    }

    /// Inserts a position, keyed by its normalized symbol. Replaces
    /// any previous entry for the same underlying asset.
    pub async fn register(&self, position: Position) {
        let key = position.symbol.clone();
        self.positions.write().await.insert(key, position);
    }

    /// Removes and returns the position for a symbol, if tracked.
    ///
    /// Also purges symbol-lock entries with no outstanding guard, so
    /// the lock table stays bounded by the set of open symbols rather
    /// than every symbol ever seen.
    pub async fn remove(&self, sym: &str) -> Option<Position> {
        let key = symbol::normalize(sym);
        let removed = self.positions.write().await.remove(&key);
        if removed.is_some() {
            // strong_count == 1 means only the table holds the lock:
            // no guard is held and nobody is waiting, so dropping the
            // entry cannot break mutual exclusion.
            self.symbol_locks
                .lock()
                .await
                .retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        removed
    }

    /// Returns a snapshot of the position for a symbol.
    pub async fn get(&self, sym: &str) -> Option<Position> {
        let key = symbol::normalize(sym);
        self.positions.read().await.get(&key).cloned()
    }

    /// Writes back an updated position snapshot. The caller must hold
    /// the symbol guard for the position's symbol.
    pub async fn replace(&self, position: &Position) {
        self.positions
            .write()
            .await
            .insert(position.symbol.clone(), position.clone());
    }

    /// Snapshot of all tracked positions.
    pub async fn list(&self) -> Vec<Position> {
        self.positions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.positions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.positions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use stopguard_core::position::Side;

    fn sample(symbol: &str) -> Position {
        Position::open(
            "pos-1",
            symbol,
            Side::Long,
            dec!(1),
            dec!(100),
            dec!(95),
            10,
            "test",
            None,
        )
    }

    #[tokio::test]
    async fn register_and_get_collapse_symbol_variants() {
        let registry = PositionRegistry::new();
        registry.register(sample("BTC/USDT")).await;

        assert!(registry.get("BTCUSDT").await.is_some());
        assert!(registry.get("btc/usdt").await.is_some());
        assert_eq!(registry.len().await, 1);

        // Registering the same asset under another spelling replaces,
        // never duplicates
        registry.register(sample("BTCUSDT")).await;
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn remove_returns_the_position() {
        let registry = PositionRegistry::new();
        registry.register(sample("ETH/USDT")).await;

        let removed = registry.remove("eth-usdt").await;
        assert!(removed.is_some());
        assert!(registry.is_empty().await);
        assert!(registry.remove("eth-usdt").await.is_none());
    }

    #[tokio::test]
    async fn replace_overwrites_snapshot() {
        let registry = PositionRegistry::new();
        registry.register(sample("BTC/USDT")).await;

        let mut pos = registry.get("BTCUSDT").await.unwrap();
        pos.observe_price(dec!(110));
        registry.replace(&pos).await;

        let stored = registry.get("BTCUSDT").await.unwrap();
        assert_eq!(stored.extreme_price, dec!(110));
    }

    #[tokio::test]
    async fn remove_purges_idle_symbol_locks() {
        let registry = PositionRegistry::new();

        // Guards create lock entries; dropping them leaves the entries idle
        drop(registry.symbol_guard("BTCUSDT").await);
        drop(registry.symbol_guard("ETHUSDT").await);
        drop(registry.symbol_guard("SOLUSDT").await);
        assert_eq!(registry.symbol_locks.lock().await.len(), 3);

        registry.register(sample("BTC/USDT")).await;
        registry.remove("BTCUSDT").await;

        assert!(registry.symbol_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn lock_purge_spares_held_guards() {
        let registry = PositionRegistry::new();
        registry.register(sample("BTC/USDT")).await;
        registry.register(sample("ETH/USDT")).await;

        let guard = registry.symbol_guard("ETHUSDT").await;
        drop(registry.symbol_guard("BTCUSDT").await);

        registry.remove("BTCUSDT").await;

        // The held guard's entry survives, the idle one is gone
        let locks = registry.symbol_locks.lock().await;
        assert_eq!(locks.len(), 1);
        assert!(locks.contains_key("ETHUSDT"));
        drop(locks);
        drop(guard);
    }

    #[tokio::test]
    async fn symbol_guard_serializes_same_symbol() {
        let registry = Arc::new(PositionRegistry::new());

        let guard = registry.symbol_guard("BTC/USDT").await;
        // A second guard for a different symbol is immediately available
        let other = registry.symbol_guard("ETHUSDT").await;
        drop(other);

        // The same symbol (different spelling) is held
        let registry2 = Arc::clone(&registry);
        let pending = tokio::spawn(async move {
            let _g = registry2.symbol_guard("BTCUSDT").await;
        });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        drop(guard);
        pending.await.unwrap();
    }
}
