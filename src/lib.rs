pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod fs_util;
pub mod http;
pub mod layout;
pub mod ledger;
pub mod mirror;
pub mod mover;
pub mod ncbi;
pub mod output;
pub mod renamer;
pub mod resolver;
pub mod tui;
