pub mod manager;
pub mod policy;
pub mod reconcile;
pub mod registry;
pub mod service;
pub mod sync;

pub use manager::{LifecycleManager, ReconcileStatus};
pub use policy::{evaluate, partial_take_profit, StopDecision};
pub use reconcile::{OrderCheckOutcome, ReconcileOutcome, Reconciler};
pub use registry::PositionRegistry;
pub use sync::OrderSynchronizer;
