//! Static extractor registry.

use std::collections::HashMap;

use crate::extractor::FeatureExtractor;
use crate::extractors::{
    DeletedServersExtractor, FlavorHostSpaceExtractor, HostCapabilitiesExtractor,
    HostUtilizationExtractor,
};

pub type ExtractorConstructor = fn() -> Box<dyn FeatureExtractor>;

fn new_host_capabilities() -> Box<dyn FeatureExtractor> {
    Box::new(HostCapabilitiesExtractor::default())
}

fn new_host_utilization() -> Box<dyn FeatureExtractor> {
    Box::new(HostUtilizationExtractor::default())
}

fn new_flavor_host_space() -> Box<dyn FeatureExtractor> {
    Box::new(FlavorHostSpaceExtractor::default())
}

fn new_deleted_servers() -> Box<dyn FeatureExtractor> {
    Box::new(DeletedServersExtractor::default())
}

/// All extractors constructible by name. Configured extractors not present
/// here fail pipeline construction.
pub fn extractor_registry() -> HashMap<&'static str, ExtractorConstructor> {
    let mut registry: HashMap<&'static str, ExtractorConstructor> = HashMap::new();
    registry.insert("host_capabilities", new_host_capabilities);
    registry.insert("host_utilization", new_host_utilization);
    registry.insert("flavor_host_space", new_flavor_host_space);
    registry.insert("deleted_servers", new_deleted_servers);
    registry
}
