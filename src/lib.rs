//! Chatgate - Rate-Limiting Admission Gateway
//!
//! This crate implements an HTTP gateway that sits in front of an LLM chat
//! endpoint and admits at most a fixed number of requests per client per
//! window. Counters live in a remote Upstash Redis store over its REST API,
//! so any number of gateway instances can share one budget.

pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod ratelimit;
pub mod store;
