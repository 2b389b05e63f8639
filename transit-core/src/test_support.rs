//! In-memory doubles for exercising code that depends on [`StopStore`].

use std::collections::{BTreeMap, HashMap};

use geo::{Intersects, Rect};

use crate::{StopRecord, StopStore, StoreError};

/// [`StopStore`] backed by plain collections.
#[derive(Debug, Default, Clone)]
pub struct MemoryStopStore {
    stops: BTreeMap<String, StopRecord>,
    preferences: HashMap<String, String>,
}

impl MemoryStopStore {
    /// Build a store holding `stops`. Later duplicates replace earlier ones.
    pub fn with_stops(stops: impl IntoIterator<Item = StopRecord>) -> Self {
        Self {
            stops: stops
                .into_iter()
                .map(|stop| (stop.stop_id.clone(), stop))
                .collect(),
            preferences: HashMap::new(),
        }
    }

    /// Add a preference value.
    #[must_use]
    pub fn with_preference(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.preferences.insert(key.into(), value.into());
        self
    }
}

impl StopStore for MemoryStopStore {
    fn stops_in_bbox(&self, bbox: &Rect<f64>) -> Result<Vec<StopRecord>, StoreError> {
        Ok(self
            .stops
            .values()
            .filter(|stop| bbox.intersects(&stop.location))
            .cloned()
            .collect())
    }

    fn stop_by_id(&self, stop_id: &str) -> Result<Option<StopRecord>, StoreError> {
        Ok(self.stops.get(stop_id).cloned())
    }

    fn preference(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.preferences.get(key).cloned())
    }
}
