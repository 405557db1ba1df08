//! Domain layer for the therapy log service.
//!
//! Holds the rating model, per-domain scoring and the weekly/monthly report
//! aggregation. Nothing here touches storage or HTTP so the aggregation can be
//! exercised directly from tests.

pub mod credentials;
pub mod report;
pub mod scoring;
pub mod types;
