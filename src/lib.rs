pub mod alert;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod locator;
pub mod mailer;
pub mod model;
pub mod reconcile;
pub mod schedule;
pub mod sheets;
pub mod sync;
