//! Decision pipeline and the state machines behind it.

pub mod circuit_breaker;
pub mod cooldown;
pub mod fee_estimator;
pub mod profit_gate;
pub mod records;
pub mod scheduler;
pub mod serializer;
pub mod target;
pub mod wallet;

pub use circuit_breaker::{BreakerPolicy, BreakerState, CircuitBreaker};
pub use fee_estimator::{FeeData, FeeEstimator, FeeQuote};
pub use profit_gate::{GateDecision, ProfitGate};
pub use records::{DecisionRecord, ExecutionRecord, ExecutionStatus, Outcome};
pub use scheduler::{ChainCollaborators, ChainRunner, ChainSummary, CycleReport, Scheduler, SchedulerSettings};
pub use serializer::{ExecutionRequest, ExecutionSerializer};
pub use target::{Target, TargetSnapshot, TargetState};
pub use wallet::WalletContext;
