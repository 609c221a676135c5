pub mod app;
pub mod archive;
pub mod config;
pub mod document;
pub mod domain;
pub mod error;
pub mod executor;
pub mod kickoff;
pub mod manifest;
pub mod output;
pub mod predicate;
pub mod records;
pub mod remote;
pub mod report;
pub mod resolver;
pub mod task;
pub mod transfer;
