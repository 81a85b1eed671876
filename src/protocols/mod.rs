//! Protocol implementations.
//!
//! - `hello`: fixed response to any request, used as a benchmark target
//!   and as the request/response pair the load generators speak

pub mod hello;
