//! DMI plugin access
//!
//! - `client`: `DmiClient` trait and operation types
//! - `http`: reqwest implementation

mod client;
mod http;

pub use client::{DmiClient, DmiMethod, DmiOperation, DmiResponse, MODULES_RESOURCE};
pub use http::HttpDmiClient;
