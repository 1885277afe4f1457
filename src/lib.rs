pub mod config;
pub mod error;
pub mod processors;
pub mod raft;
