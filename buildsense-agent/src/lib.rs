//! Agents and the machinery that runs them: shared call budget, reasoning
//! provider contract, rule-based fallbacks and the deadline-bounded pool.

pub mod agents;
pub mod llm;
pub mod pool;
pub mod rate_limiter;
pub mod reasoning;
