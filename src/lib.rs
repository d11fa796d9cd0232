pub mod app;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod output;
pub mod providers;
pub mod registrar;
pub mod storage;
