pub mod agent;
pub mod config;
pub mod decision;
pub mod error;
pub mod proposal;
pub mod room;
pub mod slo;
