//! TEDB (Taxes in Europe Database) integration.
//!
//! TEDB publishes the current VAT rates of every member state over SOAP. Only the
//! standard rate is used.

pub mod client;
pub mod types;

pub use client::{RateSource, TedbClient, TedbError};
