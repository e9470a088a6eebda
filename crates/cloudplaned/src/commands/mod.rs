pub mod reconcile;
pub mod service;
pub mod status;
