pub mod arn;
pub mod aws;
pub mod classify;
pub mod cli;
pub mod clients;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod masking;
pub mod output;
pub mod policy;
pub mod service;
