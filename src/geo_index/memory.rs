use anyhow::{Context, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{GeoIndexClient, GeoQuery, KeyEvent, KeyEventKind};
use crate::constants::SNAPSHOT_VERSION;
use crate::error::GeoIndexError;
use crate::geo::Coordinate;

// On-disk format of the index
#[derive(Serialize, Deserialize)]
struct IndexSnapshot {
    version: u32,
    locations: BTreeMap<String, Coordinate>,
}

/// Snapshot taken under the state lock, tagged with the write that produced it.
struct PendingSnapshot {
    generation: u64,
    snapshot: IndexSnapshot,
}

/// Serializes snapshot writes. A snapshot older than the last one written is
/// skipped, so the file only ever moves forward.
struct SnapshotWriter {
    path: PathBuf,
    written_generation: Mutex<u64>,
}

impl SnapshotWriter {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            written_generation: Mutex::new(0),
        }
    }

    fn write(&self, pending: PendingSnapshot) -> Result<()> {
        let mut written = self.written_generation.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.generation <= *written {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Creating snapshot directory")?;
        }
        let tmp_path = self.path.with_extension("bin.tmp");
        {
            let file = std::fs::File::create(&tmp_path)
                .with_context(|| format!("Failed to create snapshot {}", tmp_path.display()))?;
            let mut writer = BufWriter::new(file);
            bincode::serialize_into(&mut writer, &pending.snapshot).context("Failed to write snapshot")?;
            writer.flush().context("Failed to flush snapshot")?;
        }
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace snapshot {}", self.path.display()))?;

        *written = pending.generation;
        Ok(())
    }
}

struct ActiveQuery {
    id: u64,
    center: Coordinate,
    radius_km: f64,
    sender: mpsc::UnboundedSender<KeyEvent>,
}

impl ActiveQuery {
    fn contains(&self, location: &Coordinate) -> bool {
        location.is_within_km(&self.center, self.radius_km)
    }

    // Event for a key moving from `previous` to `current`, if the query cares
    fn transition(&self, key: &str, previous: Option<&Coordinate>, current: Coordinate) -> Option<KeyEvent> {
        let was_inside = previous.is_some_and(|p| self.contains(p));
        let kind = match (was_inside, self.contains(&current)) {
            (false, true) => KeyEventKind::Entered,
            (true, true) => KeyEventKind::Moved,
            (true, false) => KeyEventKind::Exited,
            (false, false) => return None,
        };
        Some(KeyEvent {
            kind,
            key: key.to_string(),
            location: current,
        })
    }
}

#[derive(Default)]
struct IndexState {
    locations: HashMap<String, Coordinate>,
    queries: Vec<ActiveQuery>,
    next_query_id: u64,
    generation: u64,
}

impl IndexState {
    fn snapshot(&self) -> PendingSnapshot {
        PendingSnapshot {
            generation: self.generation,
            snapshot: IndexSnapshot {
                version: SNAPSHOT_VERSION,
                locations: self.locations.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            },
        }
    }
}

/// In-process geospatial index with live radius queries.
#[derive(Clone, Default)]
pub struct MemoryGeoIndex {
    state: Arc<Mutex<IndexState>>,
    writer: Option<Arc<SnapshotWriter>>,
}

impl MemoryGeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the index backed by a snapshot file, starting empty when the file
    /// is missing, corrupted or from another format version.
    pub fn open(snapshot_path: impl Into<PathBuf>) -> Result<Self> {
        let snapshot_path = snapshot_path.into();
        let locations = load_snapshot(&snapshot_path)?;
        info!(
            sightings = locations.len(),
            path = %snapshot_path.display(),
            "sighting index loaded"
        );

        Ok(Self {
            state: Arc::new(Mutex::new(IndexState {
                locations,
                ..IndexState::default()
            })),
            writer: Some(Arc::new(SnapshotWriter::new(snapshot_path))),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn location(&self, key: &str) -> Option<Coordinate> {
        self.lock().locations.get(key).copied()
    }

    /// Number of queries still registered.
    pub fn active_queries(&self) -> usize {
        let mut state = self.lock();
        state.queries.retain(|q| !q.sender.is_closed());
        state.queries.len()
    }

    fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Applies the write and, when persistence is on, captures the resulting
    // state before the lock is released
    fn store(&self, key: &str, location: Coordinate) -> Result<Option<PendingSnapshot>, GeoIndexError> {
        if !location.is_valid() {
            return Err(GeoIndexError::InvalidCoordinate(location));
        }

        let mut state = self.lock();
        let previous = state.locations.insert(key.to_string(), location);
        state.generation += 1;
        state.queries.retain(|query| {
            match query.transition(key, previous.as_ref(), location) {
                Some(event) => query.sender.send(event).is_ok(),
                None => !query.sender.is_closed(),
            }
        });
        debug!(key, %location, queries = state.queries.len(), "location stored");

        Ok(self.writer.as_ref().map(|_| state.snapshot()))
    }

    fn register(&self, center: Coordinate, radius_km: f64) -> Result<GeoQuery, GeoIndexError> {
        if !center.is_valid() {
            return Err(GeoIndexError::InvalidCoordinate(center));
        }
        if !radius_km.is_finite() || radius_km < 0.0 {
            return Err(GeoIndexError::InvalidRadius(radius_km));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let id = state.next_query_id;
        state.next_query_id += 1;

        let query = ActiveQuery {
            id,
            center,
            radius_km,
            sender,
        };
        let mut initial = 0;
        for (key, location) in &state.locations {
            if query.contains(location) {
                // receiver is held locally, send cannot fail
                let _ = query.sender.send(KeyEvent::entered(key.clone(), *location));
                initial += 1;
            }
        }
        state.queries.push(query);
        debug!(id, %center, radius_km, initial, "query registered");

        let registry = Arc::downgrade(&self.state);
        Ok(GeoQuery::new(receiver).with_cancel_hook(move || {
            if let Some(state) = registry.upgrade() {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                state.queries.retain(|q| q.id != id);
                debug!(id, "query cancelled");
            }
        }))
    }
}

impl GeoIndexClient for MemoryGeoIndex {
    fn set_location(
        &self,
        key: &str,
        location: Coordinate,
    ) -> impl Future<Output = Result<(), GeoIndexError>> + Send {
        let stored = self.store(key, location);
        let writer = self.writer.clone();
        async move {
            let (Some(writer), Some(pending)) = (writer, stored?) else {
                return Ok(());
            };
            match tokio::task::spawn_blocking(move || writer.write(pending)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("failed to persist sighting index: {e:#}"),
                Err(e) => warn!("snapshot task failed: {e}"),
            }
            Ok(())
        }
    }

    fn query(
        &self,
        center: Coordinate,
        radius_km: f64,
    ) -> impl Future<Output = Result<GeoQuery, GeoIndexError>> + Send {
        std::future::ready(self.register(center, radius_km))
    }
}

fn load_snapshot(path: &Path) -> Result<HashMap<String, Coordinate>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    // Same encoding as `bincode::serialize_into`, bounded by the file size
    let decoded = bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(bytes.len() as u64)
        .deserialize::<IndexSnapshot>(&bytes);
    let snapshot = match decoded {
        Ok(s) => s,
        Err(e) => {
            warn!("sighting snapshot corrupted or incompatible ({e}), deleting it");
            let _ = std::fs::remove_file(path);
            return Ok(HashMap::new());
        }
    };

    if snapshot.version != SNAPSHOT_VERSION {
        warn!(
            found = snapshot.version,
            expected = SNAPSHOT_VERSION,
            "sighting snapshot version mismatch, deleting it"
        );
        let _ = std::fs::remove_file(path);
        return Ok(HashMap::new());
    }

    Ok(snapshot.locations.into_iter().collect())
}
