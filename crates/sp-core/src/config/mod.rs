//! # Pure Data Module - Data Transfer Objects Only
//!
//! Configuration structures and the TOML -> DTO mapping. No validation and
//! no default values here; policy lives in the application layer.

pub mod app_config;

pub use app_config::AppConfig;
