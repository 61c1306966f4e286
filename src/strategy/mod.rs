//! Detection and portfolio strategy
//!
//! Per-cycle pipeline, leaves first:
//! - `classifier` - new vs established pools
//! - `scoring` - risk score and profit potential
//! - `watchlist` - maturation buffer for candidates
//! - `validation` - re-applies floors against the current fetch
//! - `selector` - risk ceiling and reward-token diversification
//! - `portfolio` - exits, rebalancing and new positions
//! - `calculations` - simulated compounding yield

// =============================================================================
// Detection and scoring
// =============================================================================

pub mod classifier;
pub mod scoring;

pub use classifier::{Classification, Classifier, DetectionSignal};
pub use scoring::{Scorer, MAX_RISK_SCORE};

// =============================================================================
// Candidate handling
// =============================================================================

pub mod selector;
pub mod validation;
pub mod watchlist;

pub use selector::Selector;
pub use validation::{CandidateValidator, Rejection, ValidationOutcome};
pub use watchlist::{IngestSummary, Watchlist};

// =============================================================================
// Portfolio
// =============================================================================

pub mod calculations;
pub mod portfolio;

pub use calculations::{calculate_yield, ExitPoint, YieldProjection};
pub use portfolio::{ExitSummary, InvestSummary, PortfolioManager, PortfolioReport};
