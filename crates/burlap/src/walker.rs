//! The traversal engine
//!
//! Drives the transitive walk from one or more entry references:
//! resolve, load, transform, extract, then schedule every extracted
//! reference in turn. The engine keeps a FIFO worklist of scheduled
//! resolutions, a visited set keyed by canonical location, and a single
//! pending counter; records surface through [`RecordStream`], a lazy
//! iterator the consumer drives, so arbitrarily many operations are in
//! flight without threads or locks. A location is marked visited before
//! its load starts, guaranteeing at most one load even when sibling
//! requesters race for the same target; the stream ends exactly when the
//! pending counter returns to zero.

use std::{
    collections::VecDeque,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use indexmap::IndexMap;
use log::{debug, trace};
use rustc_hash::FxHashSet;

use crate::{
    error::WalkError,
    extractor,
    loader::{SourceLoader, Transform, TransformPicker},
    resolver::{ModuleResolver, RequestContext},
};

/// One bundled module, created exactly once per canonical location.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    /// Identity token the module carries after bundling
    pub id: String,
    /// Canonical location backing the module
    pub file: PathBuf,
    /// Source text after the transform chain
    pub source: String,
    /// Each literal reference in the source, mapped to the canonical
    /// location it resolved to (skipped references excluded)
    pub deps: IndexMap<String, PathBuf>,
    /// Whether this module was one of the original entry points
    pub entry: bool,
}

/// Options for one traversal.
pub struct WalkOptions {
    /// Directory entry references resolve against
    pub base_dir: PathBuf,
    /// Alias table: leading reference segment -> filesystem base path
    pub package_paths: IndexMap<String, PathBuf>,
    /// References containing any of these substrings are never resolved
    /// or walked
    pub skip: Vec<String>,
    /// Global source transforms, in application order
    pub transforms: Vec<Arc<dyn Transform>>,
    /// Optional per-package transform selection from package metadata
    pub package_transforms: Option<TransformPicker>,
}

impl fmt::Debug for WalkOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalkOptions")
            .field("base_dir", &self.base_dir)
            .field("package_paths", &self.package_paths)
            .field("skip", &self.skip)
            .field("transforms", &self.transforms.len())
            .field("package_transforms", &self.package_transforms.is_some())
            .finish()
    }
}

impl WalkOptions {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            package_paths: IndexMap::new(),
            skip: Vec::new(),
            transforms: Vec::new(),
            package_transforms: None,
        }
    }
}

/// Start a traversal over the given entry references.
///
/// The returned stream yields one record per unique canonical location,
/// in completion order, then ends. A fatal error is yielded once as the
/// final item; the stream is fused afterwards.
pub fn walk<I, S>(entries: I, options: WalkOptions) -> RecordStream
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let resolver = ModuleResolver::new(options.base_dir, options.package_paths);
    let loader = SourceLoader::new(options.transforms, options.package_transforms);

    let mut traversal = Traversal {
        resolver,
        loader,
        skip: options.skip,
        visited: FxHashSet::default(),
        pending: 0,
        queue: VecDeque::new(),
        slots: Vec::new(),
        ready: VecDeque::new(),
    };

    for entry in entries {
        let reference = entry.into();
        if traversal.is_skipped(&reference) {
            debug!("skipping entry \"{reference}\"");
            continue;
        }
        traversal.pending += 1;
        traversal.queue.push_back(Job {
            reference,
            ctx: RequestContext::root(),
            parent: None,
            entry: true,
        });
    }

    RecordStream {
        traversal,
        failed: false,
    }
}

/// A scheduled resolution: one reference from one requesting context.
struct Job {
    reference: String,
    ctx: RequestContext,
    /// Slot of the module whose extraction produced this reference
    parent: Option<usize>,
    entry: bool,
}

/// A module that has loaded and extracted but whose direct references
/// have not all resolved yet.
struct InFlight {
    id: String,
    file: PathBuf,
    source: String,
    deps: IndexMap<String, PathBuf>,
    entry: bool,
    /// Direct references still awaiting resolution
    remaining: usize,
}

struct Traversal {
    resolver: ModuleResolver,
    loader: SourceLoader,
    skip: Vec<String>,
    visited: FxHashSet<PathBuf>,
    pending: usize,
    queue: VecDeque<Job>,
    slots: Vec<Option<InFlight>>,
    ready: VecDeque<ModuleRecord>,
}

impl Traversal {
    fn is_skipped(&self, reference: &str) -> bool {
        self.skip.iter().any(|s| reference.contains(s))
    }

    /// Run one scheduled resolution to completion.
    fn step(&mut self) -> Result<(), WalkError> {
        let job = self
            .queue
            .pop_front()
            .expect("step called with empty worklist");

        let file = self.resolver.resolve(&job.reference, &job.ctx)?;

        // The parent's record completes when all of its direct references
        // have resolved, whether or not their targets finish loading.
        if let Some(parent) = job.parent {
            self.record_child(parent, &job.reference, &file);
        }

        if !self.visited.insert(file.clone()) {
            trace!("already visited {}", file.display());
            self.release();
            return Ok(());
        }

        let raw = self.loader.load(&file)?;
        let source = self.loader.apply_transforms(&file, raw)?;

        let id = self
            .resolver
            .identity_of(&file)
            .map_or_else(|| file.display().to_string(), str::to_string);

        // Resource-qualified modules are opaque payloads, not code; running
        // the extractor over arbitrary text would reject valid resources.
        let refs = if id.contains('!') {
            Vec::new()
        } else {
            extractor::extract(&source).map_err(|e| WalkError::Parse {
                file: file.clone(),
                message: e.to_string(),
            })?
        };

        let walkable: Vec<String> = refs
            .into_iter()
            .filter(|r| {
                if self.is_skipped(r) {
                    debug!("skipping \"{r}\" from {}", file.display());
                    false
                } else {
                    true
                }
            })
            .collect();

        let slot = self.slots.len();
        self.slots.push(Some(InFlight {
            id: id.clone(),
            file: file.clone(),
            source,
            deps: IndexMap::new(),
            entry: job.entry,
            remaining: walkable.len(),
        }));

        if walkable.is_empty() {
            self.finish_slot(slot);
            return Ok(());
        }

        for reference in walkable {
            self.pending += 1;
            self.queue.push_back(Job {
                reference,
                ctx: RequestContext {
                    file: file.clone(),
                    id: id.clone(),
                },
                parent: Some(slot),
                entry: false,
            });
        }
        Ok(())
    }

    /// A child reference of `slot` resolved; record it and emit the
    /// slot's record when it was the last one outstanding.
    fn record_child(&mut self, slot: usize, reference: &str, target: &Path) {
        let in_flight = self.slots[slot]
            .as_mut()
            .expect("child resolved for completed slot");
        in_flight
            .deps
            .insert(reference.to_string(), target.to_path_buf());
        in_flight.remaining -= 1;
        if in_flight.remaining == 0 {
            self.finish_slot(slot);
        }
    }

    /// Assemble and emit the record for a fully resolved module, then
    /// release the pending entry taken when it was first discovered.
    fn finish_slot(&mut self, slot: usize) {
        let in_flight = self.slots[slot].take().expect("slot finished twice");
        debug!("emitting record for {} ({})", in_flight.id, in_flight.file.display());
        self.ready.push_back(ModuleRecord {
            id: in_flight.id,
            file: in_flight.file,
            source: in_flight.source,
            deps: in_flight.deps,
            entry: in_flight.entry,
        });
        self.release();
    }

    /// Decrement the pending counter for one completed operation.
    fn release(&mut self) {
        debug_assert!(self.pending > 0, "pending counter underflow");
        self.pending -= 1;
        if self.pending == 0 {
            trace!("traversal drained");
        }
    }
}

/// Incremental record output of one traversal.
///
/// End-of-stream is the iterator's terminal `None`, emitted exactly once
/// the pending counter returns to zero; a fatal error is the final item.
pub struct RecordStream {
    traversal: Traversal,
    failed: bool,
}

impl fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStream")
            .field("pending", &self.traversal.pending)
            .field("failed", &self.failed)
            .finish()
    }
}

impl Iterator for RecordStream {
    type Item = Result<ModuleRecord, WalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.traversal.ready.pop_front() {
                return Some(Ok(record));
            }
            if self.failed || self.traversal.queue.is_empty() {
                debug_assert!(
                    self.failed || self.traversal.pending == 0,
                    "stream drained with work in flight"
                );
                return None;
            }
            if let Err(err) = self.traversal.step() {
                self.failed = true;
                self.traversal.queue.clear();
                self.traversal.ready.clear();
                return Some(Err(err));
            }
        }
    }
}

impl RecordStream {
    /// Drain the stream into a vector, failing on the first fatal error.
    pub fn collect_records(self) -> Result<Vec<ModuleRecord>, WalkError> {
        self.collect()
    }
}
