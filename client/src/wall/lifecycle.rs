//! Tile lifecycle: reconcile the required cell set against materialized tiles
//!
//! Every materialized coordinate owns exactly one `TileRecord`. Records are
//! created when a cell enters the required set, destroyed when it leaves, and
//! rekeyed in place when the zoom crosses the LOD threshold. Loader responses
//! are matched back to records by key; a response whose key no record is
//! waiting for is dropped.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};

use super::cache::ResourceRef;
use super::geometry::{Lod, TileCoord, TileKey};
use super::loader::{LoadRequest, LoadResponse, LoadStatus, RequestSink};
use super::surface::{SurfaceHandle, TileSurface};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    Unrequested,
    Loading,
    Loaded,
    Error,
}

/// One materialized tile
#[derive(Debug)]
pub struct TileRecord {
    pub key: TileKey,
    pub surface: SurfaceHandle,
    pub load_state: LoadState,
    resource: Option<ResourceRef>,
}

impl TileRecord {
    /// Pixels of the current tier, once loaded
    pub fn resource(&self) -> Option<&ResourceRef> {
        self.resource.as_ref()
    }

    fn issue<R: RequestSink>(&mut self, sink: &mut R) {
        sink.submit(LoadRequest::for_key(self.key));
        self.load_state = LoadState::Loading;
    }
}

/// Work done by one reconcile pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub destroyed: usize,
    pub reloaded: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.destroyed == 0 && self.reloaded == 0
    }
}

/// What happened to a loader response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Image delivered to this many tiles
    Applied(usize),
    /// This many tiles moved to the error state
    Failed(usize),
    /// No tile is waiting for the key
    Stale,
    /// Malformed message
    Ignored,
}

/// Materialized tiles keyed by coordinate
pub struct TileLifecycle {
    records: HashMap<TileCoord, TileRecord>,
    lod: Lod,
}

impl Default for TileLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl TileLifecycle {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            lod: Lod::Low,
        }
    }

    /// Tier of every materialized tile
    pub fn lod(&self) -> Lod {
        self.lod
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, coord: TileCoord) -> Option<&TileRecord> {
        self.records.get(&coord)
    }

    pub fn records(&self) -> impl Iterator<Item = &TileRecord> {
        self.records.values()
    }

    /// Currently materialized coordinates
    pub fn visible_set(&self) -> HashSet<TileCoord> {
        self.records.keys().copied().collect()
    }

    /// Diff `required` against the materialized set: evict leavers, reload
    /// everything on a tier change, then create and request newcomers.
    pub fn reconcile<S: TileSurface, R: RequestSink>(
        &mut self,
        required: &HashSet<TileCoord>,
        lod: Lod,
        surface: &mut S,
        sink: &mut R,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let leaving: Vec<TileCoord> = self
            .records
            .keys()
            .filter(|coord| !required.contains(coord))
            .copied()
            .collect();
        for coord in leaving {
            if let Some(record) = self.records.remove(&coord) {
                surface.destroy(record.surface);
                report.destroyed += 1;
            }
        }

        if lod != self.lod {
            debug!(
                "LOD {:?} -> {:?}, reloading {} tiles",
                self.lod,
                lod,
                self.records.len()
            );
            self.lod = lod;
            for record in self.records.values_mut() {
                record.resource = None;
                record.key = TileKey::new(record.key.coord, lod);
                record.load_state = LoadState::Unrequested;
                record.issue(sink);
                report.reloaded += 1;
            }
        }

        for coord in required {
            if self.records.contains_key(coord) {
                continue;
            }
            let mut record = TileRecord {
                key: TileKey::new(*coord, lod),
                surface: surface.materialize(*coord),
                load_state: LoadState::Unrequested,
                resource: None,
            };
            record.issue(sink);
            self.records.insert(*coord, record);
            report.created += 1;
        }

        report
    }

    /// Deliver a loader response to every tile loading its key
    pub fn apply<S: TileSurface>(&mut self, response: LoadResponse, surface: &mut S) -> ApplyOutcome {
        let LoadResponse {
            key,
            resource,
            status,
            error,
        } = response;

        let key: TileKey = match key.parse() {
            Ok(key) => key,
            Err(e) => {
                warn!("Ignoring loader message: {}", e);
                return ApplyOutcome::Ignored;
            }
        };

        let resource = match (status, resource) {
            (LoadStatus::Error, _) => None,
            (_, Some(resource)) => Some(resource),
            (status, None) => {
                warn!("Ignoring {:?} response for {} without a resource", status, key);
                return ApplyOutcome::Ignored;
            }
        };

        let mut matched = 0;
        for record in self
            .records
            .values_mut()
            .filter(|r| r.key == key && r.load_state == LoadState::Loading)
        {
            matched += 1;
            match &resource {
                Some(resource) => {
                    surface.update(record.surface, resource);
                    record.resource = Some(resource.clone());
                    record.load_state = LoadState::Loaded;
                }
                None => record.load_state = LoadState::Error,
            }
        }

        if matched == 0 {
            debug!("Dropping stale response for {}", key);
            return ApplyOutcome::Stale;
        }
        match resource {
            Some(_) => ApplyOutcome::Applied(matched),
            None => {
                warn!(
                    "Tile {} failed to load: {}",
                    key,
                    error.as_deref().unwrap_or("unknown error")
                );
                ApplyOutcome::Failed(matched)
            }
        }
    }
}
