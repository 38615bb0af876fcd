//! Downstream clusters: their records, clients, the live registry and the control-plane
//! machinery that keeps it current.

pub mod admin;
pub mod client;
pub mod identity;
pub mod info;
pub mod kube_client;
pub mod proxy;
pub mod registry;
pub mod store;
#[cfg(test)]
pub(crate) mod testing;
pub mod watcher;
