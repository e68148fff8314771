// ABOUTME: Per-project budget tracking and admission control
// ABOUTME: Gates metered calls against recorded spend with merge-on-conflict usage records

pub mod guard;
pub mod storage;
pub mod types;

pub use guard::BudgetGuard;
pub use storage::UsageStorage;
pub use types::{current_period, BudgetDecision, BudgetLedger, UsageRecord};
