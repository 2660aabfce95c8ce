//! FLG Claims Lead Router Library
//!
//! Turns vehicle-finance claim submissions into CRM leads and keeps those
//! leads in step with the CRM's status webhooks.
//!
//! # Modules
//!
//! - `similarity`: Lender name similarity scoring.
//! - `lender_directory`: Cached lender registry and name resolution.
//! - `lender_import`: CSV parsing for the lender import tool.
//! - `eligibility`: Agreement date window checks.
//! - `fanout`: Claim to lead planning, references and cost tiers.
//! - `dispatch`: Retrying background lead dispatch.
//! - `notifier`: Best-effort lead id notification.
//! - `reconciliation`: Status webhook to lead mutation rules.
//! - `crm_client`: FLG API client.
//! - `circuit_breaker`: Circuit breaker for CRM calls.
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `db_storage`: Postgres storage.
//! - `repository`: Storage traits and in-memory storage.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers and router.
//! - `models`: Core data models.
//! - `security`: Webhook HMAC verification.
//! - `validation`: Claim input validation.
//! - `webhook_handler`: FLG status webhook handler.
//! - `webhook_models`: Webhook payload models.

pub mod circuit_breaker;
pub mod config;
pub mod crm_client;
pub mod db;
pub mod db_storage;
pub mod dispatch;
pub mod eligibility;
pub mod errors;
pub mod fanout;
pub mod handlers;
pub mod lender_directory;
pub mod lender_import;
pub mod models;
pub mod notifier;
pub mod reconciliation;
pub mod repository;
pub mod security;
pub mod similarity;
pub mod validation;
pub mod webhook_handler;
pub mod webhook_models;
