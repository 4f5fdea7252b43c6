pub mod admin;
pub mod calculator;
pub mod command;
pub mod keys;
pub mod process;
pub mod record;
pub mod registry;
pub mod settings;
pub mod sim;
pub mod state_model;
pub mod store;
pub mod synthesizer;
pub mod trace;
pub mod transition;
pub mod verifier;

pub use shardwalk_macros::test;
