//! power-model: power estimation models trained on Prometheus telemetry.
//!
//! A pipeline file names the target power series and one or more pipelines,
//! each a set of feature queries. Every configured regressor is trained per
//! pipeline, persisted, and later used to predict from live telemetry, either
//! on a polling loop exported to Prometheus or on demand over a Unix socket.

pub mod config;
pub mod datasource;
pub mod model;
pub mod server;
pub mod trainer;
