//! Spacewatch library
//!
//! Office space analytics from person detections: zone residency, hours by
//! zone type, utilization, and anomaly detection.
//! Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
