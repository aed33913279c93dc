//! Clients for the backend REST API.

pub mod http;
pub mod sales_api;

pub use sales_api::{HttpSalesApi, SalesApi};
