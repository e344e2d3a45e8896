use std::sync::{Arc, RwLock};

use bale_types::BlobId;

/// Final location of a sealed export: backend locator + export index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FlushedLocation {
    /// Locator of the sealed bundle (the backend blob id of its bytes).
    pub bundle: BlobId,
    /// Index of the export within that bundle.
    pub export: u32,
}

/// Where a handle's payload currently lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleState {
    /// The payload sits in the writer session's open bundle. `bundle_seq`
    /// identifies which open bundle of the session; `export` is the
    /// arena index within it. Only readable while that session is alive.
    Pending { bundle_seq: u64, export: u32 },
    /// The payload was sealed into the backend. The locator never changes
    /// again.
    Flushed(FlushedLocation),
}

/// Shared indirection cell behind every copy of one handle.
///
/// Promotion from pending to flushed happens exactly once, at seal time.
/// Every outstanding clone of the handle observes the promotion through
/// this cell; handed-out values are never retroactively mutated.
#[derive(Debug)]
pub struct HandleCell {
    state: RwLock<HandleState>,
}

impl HandleCell {
    pub(crate) fn pending(bundle_seq: u64, export: u32) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(HandleState::Pending { bundle_seq, export }),
        })
    }

    pub(crate) fn flushed(location: FlushedLocation) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(HandleState::Flushed(location)),
        })
    }

    /// Current state, by value.
    pub fn state(&self) -> HandleState {
        *self.state.read().expect("lock poisoned")
    }

    /// Promote a pending handle to its final location.
    pub(crate) fn promote(&self, location: FlushedLocation) {
        let mut state = self.state.write().expect("lock poisoned");
        debug_assert!(
            matches!(*state, HandleState::Pending { .. }),
            "handle promoted twice"
        );
        *state = HandleState::Flushed(location);
    }
}

/// A reference to a stored payload.
///
/// Cheap to clone; all clones share one [`HandleCell`], so a clone taken
/// before the owning bundle seals observes the flushed location afterward.
#[derive(Clone, Debug)]
pub struct BlobHandle {
    hash: BlobId,
    cell: Arc<HandleCell>,
}

impl BlobHandle {
    pub(crate) fn new(hash: BlobId, cell: Arc<HandleCell>) -> Self {
        Self { hash, cell }
    }

    /// Reconstruct a handle for an export already sealed into a bundle.
    pub fn flushed(hash: BlobId, bundle: BlobId, export: u32) -> Self {
        Self {
            hash,
            cell: HandleCell::flushed(FlushedLocation { bundle, export }),
        }
    }

    /// Content hash of the payload this handle names.
    pub fn hash(&self) -> BlobId {
        self.hash
    }

    /// Current state of the handle.
    pub fn state(&self) -> HandleState {
        self.cell.state()
    }

    /// Returns `true` once the owning bundle has been sealed.
    pub fn is_flushed(&self) -> bool {
        matches!(self.state(), HandleState::Flushed(_))
    }

    /// Final location, if sealed.
    pub fn flushed_location(&self) -> Option<FlushedLocation> {
        match self.state() {
            HandleState::Flushed(location) => Some(location),
            HandleState::Pending { .. } => None,
        }
    }

    pub(crate) fn cell(&self) -> &Arc<HandleCell> {
        &self.cell
    }
}
