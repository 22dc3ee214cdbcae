//! Observability setup for plexus: the global tracing subscriber and the
//! optional OpenTelemetry bridge.

pub mod tracing_setup;
