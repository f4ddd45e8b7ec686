pub mod metrics;
pub mod rbac;
