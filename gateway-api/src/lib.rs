//! Gateway in front of a fleet of Kubernetes clusters.
//!
//! Cluster credentials live in a store on the control-plane cluster. A watcher keeps an
//! in-memory registry of connected clients in line with that store, an admin API manages
//! registrations and a proxy relays requests to the cluster selected by code.

pub mod authentication;
pub mod clusters;
pub mod concurrency;
pub mod config;
pub mod k8s;
pub mod routes;
pub mod span_builder;
pub mod startup;
pub mod workloads;
