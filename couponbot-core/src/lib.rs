// src/lib.rs

pub mod allocation;
pub mod catalog;
pub mod config;
pub mod db;
pub mod eventbus;
pub mod http;
pub mod identity;
pub mod ledger;
pub mod repositories;
pub mod services;
pub mod test_utils;
pub mod utils;

pub use db::Database;
pub use couponbot_common::error::{ClaimFailure, Error};
pub use http::{DefaultHttpClient, HttpClient};
