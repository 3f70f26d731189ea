pub mod advisor;
pub mod aggregator;
pub mod claude_cli;
pub mod collector;
pub mod error;
pub mod parser;
pub mod policy;
pub mod prompts;
pub mod statistics;

pub mod test_support;

pub use advisor::{Advisor, ClaudeAdvisor};
pub use aggregator::{consensus_tier, ConsensusAggregator};
pub use collector::{CollectTimeouts, VoteCollector, DRY_RUN_ADVISOR_ID};
pub use error::{AdvisorError, CouncilError};
pub use policy::VotingPolicy;
pub use statistics::{StatisticsSnapshot, StatisticsTracker};
