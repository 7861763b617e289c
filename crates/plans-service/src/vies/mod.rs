//! VIES (VAT Information Exchange System) integration.
//!
//! Used to tell EU companies with a registered VAT number, which are invoiced under the
//! reverse-charge rule, from everybody else.

pub mod client;
pub mod types;

pub use client::{VatValidator, ViesClient, ViesError};
