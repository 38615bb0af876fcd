//! Access to the credential store kept in the control-plane cluster.
//!
//! The store is a single `ConfigMap` whose binary data maps cluster codes to serialized
//! cluster records. Consumers depend on the [`K8sClient`] trait; [`http::HttpK8sClient`]
//! implements it on top of the [`kube`] crate using the ambient configuration (in-cluster
//! service account or local `~/.kube/config`). Tests substitute an in-memory store.

mod base;
pub mod http;
#[cfg(test)]
pub(crate) mod memory;

pub use base::*;
