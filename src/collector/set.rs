//! The explicit list of query collectors shared by the scheduler wiring and
//! the scrape endpoint.

use std::sync::Arc;

use prometheus::core::{Collector as _, Desc};
use prometheus::{Registry, proto};

use crate::collector::QueryCollector;

/// Query collectors exposed to a [`Registry`] as one unit.
///
/// A registry identifies collectors by their descriptors at registration
/// time, and collectors still waiting for data have none. Registering the
/// set once lets every member join the scrape whenever it becomes ready.
#[derive(Debug, Clone, Default)]
pub struct CollectorSet {
    collectors: Vec<Arc<QueryCollector>>,
}

impl CollectorSet {
    pub fn new(collectors: Vec<Arc<QueryCollector>>) -> Self {
        Self { collectors }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<QueryCollector>> {
        self.collectors.iter()
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Register the set with `registry`.
    ///
    /// # Errors
    /// Returns `prometheus::Error::AlreadyReg` if the set (or a collector with
    /// one of its descriptors) is already registered.
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.clone()))
    }
}

impl prometheus::core::Collector for CollectorSet {
    fn desc(&self) -> Vec<&Desc> {
        self.collectors.iter().flat_map(|c| c.desc()).collect()
    }

    fn collect(&self) -> Vec<proto::MetricFamily> {
        self.collectors.iter().flat_map(|c| c.collect()).collect()
    }
}
