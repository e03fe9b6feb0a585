pub mod accrual;
pub mod database;
pub mod dispatch;
pub mod memory;
pub mod metrics;
pub mod planner;
pub mod providers;
pub mod quota;
pub mod store;

pub use accrual::AccrualEngine;
pub use database::Database;
pub use dispatch::{create_send_pacer, DispatchRunner, DispatchSummary, SendPacer};
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use planner::SchedulePlanner;
pub use quota::{QuotaDecision, QuotaGuard};
