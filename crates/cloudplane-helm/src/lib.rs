//! Helm provider for Cloudplane integrated services
//!
//! This crate implements the `ServiceOperator` trait on top of the helm
//! CLI, so every integrated service is a chart release on its cluster.
//!
//! # Requirements
//!
//! - `helm` (v3) must be installed
//! - Each cluster is reachable through a kube context named after it
//!
//! # Example
//!
//! ```ignore
//! use cloudplane_cloud::Waiter;
//! use cloudplane_helm::{ChartSpec, Helm, HelmOperator};
//!
//! let operator = HelmOperator::new(Helm::default(), Waiter::default()).with_chart(
//!     "logging",
//!     ChartSpec::new("grafana/loki", "logging")
//!         .with_repository("https://grafana.github.io/helm-charts"),
//! );
//! ```

pub mod error;
pub mod helm;
pub mod operator;

pub use error::{HelmError, Result};
pub use helm::{ChartInstall, Helm, Release, ReleaseStatus, ReleaseTarget};
pub use operator::{ChartSpec, HelmOperator};
