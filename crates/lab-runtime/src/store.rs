use lab_core::{
    BlueprintId, EngineError, EngineResult, JobId, OwnerId, OwnerRecord, ScoredArtifact,
    StoreSnapshot, Subject,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

/// Persistence seam for owner records.
///
/// `transact` is the only write path: it runs `f` against the owner's record
/// with exclusive access and commits only when `f` returns `Ok`, so the
/// read-check-write of a start or a completion is one atomic step.
pub trait Store: Send + Sync {
    fn insert_owner(&self, record: OwnerRecord) -> EngineResult<()>;

    fn load(&self, owner: &OwnerId) -> EngineResult<OwnerRecord>;

    fn transact<R, F>(&self, owner: &OwnerId, f: F) -> EngineResult<R>
    where
        F: FnOnce(&mut OwnerRecord) -> EngineResult<R>;

    /// Allocate a job id. Ids are unique and increasing across owners.
    fn next_job_id(&self) -> EngineResult<JobId>;

    fn owner_ids(&self) -> EngineResult<Vec<OwnerId>>;

    /// Artifacts of every owner, optionally restricted to one blueprint.
    fn artifacts(&self, blueprint: Option<&BlueprintId>) -> EngineResult<Vec<ScoredArtifact>>;

    fn snapshot(&self) -> EngineResult<StoreSnapshot>;
}

type Slot = Arc<Mutex<OwnerRecord>>;

/// In-process store with one lock per owner.
#[derive(Debug)]
pub struct MemoryStore {
    owners: RwLock<HashMap<OwnerId, Slot>>,
    next_id: AtomicU64,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            owners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
        }
    }
}

fn poisoned(what: &str) -> EngineError {
    EngineError::StoreUnavailable(format!("{what} lock poisoned"))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let max_seen = snapshot
            .owners
            .iter()
            .flat_map(|o| o.jobs.iter().map(|j| j.id.0))
            .max()
            .unwrap_or(0);
        let owners = snapshot
            .owners
            .into_iter()
            .map(|r| (r.state.id.clone(), Arc::new(Mutex::new(r))))
            .collect();
        Self {
            owners: RwLock::new(owners),
            next_id: AtomicU64::new(snapshot.next_job_id.max(max_seen + 1)),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: every call fails with `StoreUnavailable` while off.
    pub fn set_available(&self, available: bool) {
        if !available {
            warn!("memory store taken offline");
        }
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> EngineResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::StoreUnavailable("store offline".into()))
        }
    }

    fn slot(&self, owner: &OwnerId) -> EngineResult<Slot> {
        self.ensure_available()?;
        let owners = self.owners.read().map_err(|_| poisoned("owner map"))?;
        owners
            .get(owner)
            .cloned()
            .ok_or_else(|| EngineError::not_found(Subject::Owner(owner.clone())))
    }

    fn slots(&self) -> EngineResult<Vec<Slot>> {
        self.ensure_available()?;
        let owners = self.owners.read().map_err(|_| poisoned("owner map"))?;
        Ok(owners.values().cloned().collect())
    }
}

impl Store for MemoryStore {
    fn insert_owner(&self, record: OwnerRecord) -> EngineResult<()> {
        self.ensure_available()?;
        let mut owners = self.owners.write().map_err(|_| poisoned("owner map"))?;
        let id = record.state.id.clone();
        if owners.contains_key(&id) {
            return Err(EngineError::AlreadyExists(Subject::Owner(id)));
        }
        owners.insert(id, Arc::new(Mutex::new(record)));
        Ok(())
    }

    fn load(&self, owner: &OwnerId) -> EngineResult<OwnerRecord> {
        let slot = self.slot(owner)?;
        let rec = slot.lock().map_err(|_| poisoned("owner"))?;
        Ok(rec.clone())
    }

    fn transact<R, F>(&self, owner: &OwnerId, f: F) -> EngineResult<R>
    where
        F: FnOnce(&mut OwnerRecord) -> EngineResult<R>,
    {
        let slot = self.slot(owner)?;
        let mut rec = slot.lock().map_err(|_| poisoned("owner"))?;
        let mut draft = rec.clone();
        let out = f(&mut draft)?;
        *rec = draft;
        debug!(owner = %owner, "transaction committed");
        Ok(out)
    }

    fn next_job_id(&self) -> EngineResult<JobId> {
        self.ensure_available()?;
        Ok(JobId(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    fn owner_ids(&self) -> EngineResult<Vec<OwnerId>> {
        self.ensure_available()?;
        let owners = self.owners.read().map_err(|_| poisoned("owner map"))?;
        let mut ids: Vec<OwnerId> = owners.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn artifacts(&self, blueprint: Option<&BlueprintId>) -> EngineResult<Vec<ScoredArtifact>> {
        let mut out = Vec::new();
        for slot in self.slots()? {
            let rec = slot.lock().map_err(|_| poisoned("owner"))?;
            out.extend(
                rec.artifacts
                    .iter()
                    .filter(|a| blueprint.map_or(true, |b| &a.blueprint == b))
                    .cloned(),
            );
        }
        Ok(out)
    }

    fn snapshot(&self) -> EngineResult<StoreSnapshot> {
        let mut owners = Vec::new();
        for slot in self.slots()? {
            owners.push(slot.lock().map_err(|_| poisoned("owner"))?.clone());
        }
        owners.sort_by(|a, b| a.state.id.cmp(&b.state.id));
        Ok(StoreSnapshot {
            owners,
            next_job_id: self.next_id.load(Ordering::SeqCst),
            time_anchors: BTreeMap::new(),
        })
    }
}
