pub mod agents;
pub mod cli;
pub mod config;
pub mod doctor;
pub mod error;
pub mod profiles;
pub mod provider;
pub mod report;
pub mod telemetry;
pub mod theme;
pub mod tools;
pub mod voice;
pub mod workflow;

#[cfg(test)]
mod tests;
