#![allow(dead_code)]

pub mod clusters;
pub mod k8s_client;
pub mod test_app;
