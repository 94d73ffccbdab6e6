//! Feature extractors.
//!
//! Each extractor owns one feature table and derives it from the synced
//! source tables. Whole-replace extractors delete and re-insert inside one
//! transaction; delta extractors upsert by primary key and advance their
//! changes-since watermark.

pub mod deleted_servers;
pub mod flavor_host_space;
pub mod host_capabilities;
pub mod host_utilization;

pub use deleted_servers::DeletedServersExtractor;
pub use flavor_host_space::FlavorHostSpaceExtractor;
pub use host_capabilities::HostCapabilitiesExtractor;
pub use host_utilization::HostUtilizationExtractor;
