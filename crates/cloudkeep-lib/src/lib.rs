// cloudkeep-lib: account connection and token lifecycle for cloud drives

pub mod account;
pub mod auth;
pub mod cli;
pub mod commands;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod files;
pub mod http_client;
pub mod logger;
pub mod output;
pub mod prompt;
pub mod provider;
pub mod registry;
pub mod signal;

#[cfg(test)]
mod test_support;
