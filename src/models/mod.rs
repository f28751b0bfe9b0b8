pub mod agent;
pub mod handoff;
pub mod order;
pub mod rating;
pub mod tab;
