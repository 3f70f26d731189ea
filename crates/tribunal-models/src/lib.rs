pub mod action;
pub mod advisor_message;
pub mod averaging;
pub mod config;
pub mod decision;
pub mod ledger_schema;
pub mod position;

pub use action::ActionKind;
pub use advisor_message::{AdvisorAction, AdvisorJudgment, AdvisorRequest, DecisionContext};
pub use averaging::{AveragingContext, AveragingDecision, FundamentalsSnapshot, MarketRegime};
pub use config::{
    AdvisorConfig, AdvisorsConfig, AveragingConfig, ConsensusConfig, FundamentalsBands,
    LedgerConfig, QuorumRule, TribunalConfig, VotingConfig,
};
pub use decision::{ConsensusTier, DecisionResult, Vote, VoteDecision};
pub use ledger_schema::PositionRow;
pub use position::{
    CloseReason, LedgerSnapshot, Position, PositionClosure, PositionEntry, PositionStatus,
    PositionSummary, RealizedPnl, UnrealizedPnl,
};
