pub mod config;
pub mod db;
pub mod grade;
pub mod models;
pub mod report;
pub mod service;
pub mod source;
pub mod stats;
