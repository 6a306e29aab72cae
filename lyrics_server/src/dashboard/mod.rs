//! Dashboard queries.

pub mod kpi;
