pub mod gate;
pub mod ledger;
pub mod monitor;
pub mod notifier;
pub mod orchestrator;

pub use gate::ConcurrencyGate;
pub use ledger::{PriceCheck, PriceLedger, PriceStatus};
pub use monitor::{CycleOutcome, MonitorContext, MonitorStats, ProductMonitor, SkipReason};
pub use notifier::{
    AlertLog, FlushOutcome, NotificationQueue, NotificationSettings, RateLimitMarker,
};
pub use orchestrator::{Orchestrator, RunSummary};
