//! # Degraphmalizer
//!
//! The job orchestrator: sequences graph mutation and recompute work.
//!
//! ## Workers
//!
//! - One graph-mutation worker, fed by a FIFO queue. For each action it runs
//!   extraction, pre-context, commit (or delete) and post-context under one
//!   write lock on the blocking pool, so no other mutation can interleave.
//! - Recomputes of a batch run as independent tasks; a `JoinSet` is the
//!   barrier that fires `complete` once all of them have resolved.
//! - Document fetches during walks run on the blocking pool (see
//!   `DocumentResolver`).
//!
//! ## Expiry
//!
//! Every identity reported stale by a recompute is resubmitted as a fresh
//! UPDATE, one level deeper in the cascade. Resubmission stops once
//! `EngineSettings::max_expiry_cascade` is reached.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::configuration::{Configuration, EngineSettings, TypeConfig};
use crate::documents::DocumentStore;
use crate::graph::GraphStore;
use crate::manager::SubgraphManager;
use crate::recompute::{RecomputeAction, RecomputeResult, Recomputer, run_blocking};
use crate::status::DegraphmalizeStatus;
use crate::subgraph::{Subgraph, merge};
use crate::types::{DgmError, DocumentId, DocumentKey};
use crate::walker::reachable_documents;

// =============================================================================
// ACTIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Update,
    Delete,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Update => write!(f, "UPDATE"),
            ActionType::Delete => write!(f, "DELETE"),
        }
    }
}

/// Source of salts for action hashes.
pub trait SequenceSource: Send + Sync {
    fn next(&self) -> u64;
}

/// Monotonic in-process counter.
#[derive(Debug, Default)]
pub struct AtomicSequence(AtomicU64);

impl AtomicSequence {
    #[must_use]
    pub fn starting_at(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }
}

impl SequenceSource for AtomicSequence {
    fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// One change to degraphmalize.
pub struct DegraphmalizeAction {
    action_type: ActionType,
    id: DocumentId,
    configs: Vec<Arc<dyn TypeConfig>>,
    hash: String,
    cascade: u32,
    status: Arc<dyn DegraphmalizeStatus>,
}

impl DegraphmalizeAction {
    fn new(
        action_type: ActionType,
        id: DocumentId,
        configs: Vec<Arc<dyn TypeConfig>>,
        salt: u64,
        cascade: u32,
        status: Arc<dyn DegraphmalizeStatus>,
    ) -> Self {
        let hash = action_hash(salt, action_type, &configs, &id);
        Self {
            action_type,
            id,
            configs,
            hash,
            cascade,
            status,
        }
    }

    #[must_use]
    pub fn action_type(&self) -> ActionType {
        self.action_type
    }

    #[must_use]
    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    #[must_use]
    pub fn configs(&self) -> &[Arc<dyn TypeConfig>] {
        &self.configs
    }

    /// Hex digest identifying this action.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Number of expiry resubmissions that led to this action; 0 if submitted directly.
    #[must_use]
    pub fn cascade(&self) -> u32 {
        self.cascade
    }
}

impl fmt::Debug for DegraphmalizeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DegraphmalizeAction")
            .field("action_type", &self.action_type)
            .field("id", &self.id)
            .field("configs", &self.configs.iter().map(|c| c.name()).collect::<Vec<_>>())
            .field("hash", &self.hash)
            .field("cascade", &self.cascade)
            .finish_non_exhaustive()
    }
}

fn action_hash(
    salt: u64,
    action_type: ActionType,
    configs: &[Arc<dyn TypeConfig>],
    id: &DocumentId,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&salt.to_le_bytes());
    hasher.update(action_type.to_string().as_bytes());
    for config in configs {
        hasher.update(b"\0");
        hasher.update(config.name().as_bytes());
    }
    hasher.update(b"\0");
    hasher.update(id.to_string().as_bytes());
    hasher.finalize().to_hex().to_string()
}

// =============================================================================
// RESULTS AND HANDLES
// =============================================================================

#[derive(Debug)]
pub enum DegraphmalizeOutcome {
    /// The graph was updated; one result per scheduled recompute, in scheduling order.
    Complete(Vec<RecomputeResult>),
    /// Graph mutation failed; nothing was recomputed.
    Failed(DgmError),
}

#[derive(Debug)]
pub struct DegraphmalizeResult {
    pub action: Arc<DegraphmalizeAction>,
    pub outcome: DegraphmalizeOutcome,
    /// Actions submitted to repair expired recomputes of this batch.
    pub resubmitted: Vec<DegraphmalizeHandle>,
}

impl DegraphmalizeResult {
    #[must_use]
    pub fn results(&self) -> &[RecomputeResult] {
        match &self.outcome {
            DegraphmalizeOutcome::Complete(results) => results,
            DegraphmalizeOutcome::Failed(_) => &[],
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&DgmError> {
        match &self.outcome {
            DegraphmalizeOutcome::Complete(_) => None,
            DegraphmalizeOutcome::Failed(error) => Some(error),
        }
    }
}

/// Completion handle of a submitted action.
#[derive(Debug)]
pub struct DegraphmalizeHandle {
    action: Arc<DegraphmalizeAction>,
    receiver: oneshot::Receiver<DegraphmalizeResult>,
}

impl DegraphmalizeHandle {
    #[must_use]
    pub fn action(&self) -> &Arc<DegraphmalizeAction> {
        &self.action
    }

    /// Wait for the batch of this action to resolve.
    ///
    /// # Errors
    ///
    /// `EngineStopped` if the engine went away before reporting.
    pub async fn wait(self) -> Result<DegraphmalizeResult, DgmError> {
        self.receiver.await.map_err(|_| DgmError::EngineStopped)
    }

    /// Wait for this action and, transitively, every action resubmitted
    /// because of it. Results are in breadth-first order, this action first.
    pub async fn wait_all(self) -> Result<Vec<DegraphmalizeResult>, DgmError> {
        let mut pending = VecDeque::from([self]);
        let mut done = Vec::new();
        while let Some(handle) = pending.pop_front() {
            let mut result = handle.wait().await?;
            pending.extend(std::mem::take(&mut result.resubmitted));
            done.push(result);
        }
        Ok(done)
    }
}

// =============================================================================
// ENGINE
// =============================================================================

struct Job {
    action: Arc<DegraphmalizeAction>,
    reply: oneshot::Sender<DegraphmalizeResult>,
}

struct Engine<G: ?Sized, D: ?Sized> {
    graph: Arc<RwLock<G>>,
    documents: Arc<D>,
    configuration: Configuration,
    settings: EngineSettings,
    sequence: Arc<dyn SequenceSource>,
    recomputer: Recomputer<G, D>,
}

/// The degraphmalizer service.
///
/// Cloning is cheap; all clones feed the same graph-mutation worker. The
/// worker stops once every clone is dropped and its queue has drained.
pub struct Degraphmalizer<G: ?Sized, D: ?Sized> {
    engine: Arc<Engine<G, D>>,
    jobs: mpsc::UnboundedSender<Job>,
}

impl<G: ?Sized, D: ?Sized> Clone for Degraphmalizer<G, D> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            jobs: self.jobs.clone(),
        }
    }
}

impl<G, D> Degraphmalizer<G, D>
where
    G: GraphStore + ?Sized + 'static,
    D: DocumentStore + ?Sized + 'static,
{
    /// Start the engine with an in-process sequence source.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        graph: Arc<RwLock<G>>,
        documents: Arc<D>,
        configuration: Configuration,
        settings: EngineSettings,
    ) -> Self {
        Self::with_sequence(
            graph,
            documents,
            configuration,
            settings,
            Arc::new(AtomicSequence::default()),
        )
    }

    /// Start the engine with an injected sequence source for action hashes.
    pub fn with_sequence(
        graph: Arc<RwLock<G>>,
        documents: Arc<D>,
        configuration: Configuration,
        settings: EngineSettings,
        sequence: Arc<dyn SequenceSource>,
    ) -> Self {
        let recomputer = Recomputer::new(Arc::clone(&graph), Arc::clone(&documents), settings.clone());
        let engine = Arc::new(Engine {
            graph,
            documents,
            configuration,
            settings,
            sequence,
            recomputer,
        });
        let (jobs, queue) = mpsc::unbounded_channel();
        tokio::spawn(mutation_worker(Arc::clone(&engine), queue, jobs.downgrade()));
        tracing::info!(types = engine.configuration.types().len(), "degraphmalizer started");
        Self { engine, jobs }
    }

    /// Queue `action_type` for `id` under `configs`. Never blocks.
    pub fn submit(
        &self,
        action_type: ActionType,
        id: DocumentId,
        configs: Vec<Arc<dyn TypeConfig>>,
        status: Arc<dyn DegraphmalizeStatus>,
    ) -> DegraphmalizeHandle {
        enqueue(&self.engine, &self.jobs, action_type, id, configs, 0, status)
    }

    /// Queue `action_type` for `id` under every configuration matching its index and type.
    ///
    /// # Errors
    ///
    /// `ConfigurationMismatch` when no configuration matches.
    pub fn degraphmalize(
        &self,
        action_type: ActionType,
        id: DocumentId,
        status: Arc<dyn DegraphmalizeStatus>,
    ) -> Result<DegraphmalizeHandle, DgmError> {
        let configs = self
            .engine
            .configuration
            .require_configs(id.index(), id.type_name())?;
        Ok(self.submit(action_type, id, configs, status))
    }

    #[must_use]
    pub fn graph(&self) -> &Arc<RwLock<G>> {
        &self.engine.graph
    }

    #[must_use]
    pub fn documents(&self) -> &Arc<D> {
        &self.engine.documents
    }

    #[must_use]
    pub fn configuration(&self) -> &Configuration {
        &self.engine.configuration
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.engine.settings
    }
}

fn enqueue<G: ?Sized, D: ?Sized>(
    engine: &Engine<G, D>,
    jobs: &mpsc::UnboundedSender<Job>,
    action_type: ActionType,
    id: DocumentId,
    configs: Vec<Arc<dyn TypeConfig>>,
    cascade: u32,
    status: Arc<dyn DegraphmalizeStatus>,
) -> DegraphmalizeHandle {
    let salt = engine.sequence.next();
    let action = Arc::new(DegraphmalizeAction::new(
        action_type, id, configs, salt, cascade, status,
    ));
    let (reply, receiver) = oneshot::channel();
    let job = Job {
        action: Arc::clone(&action),
        reply,
    };
    if jobs.send(job).is_err() {
        tracing::warn!(hash = action.hash(), "engine stopped, action dropped");
    }
    DegraphmalizeHandle { action, receiver }
}

// =============================================================================
// GRAPH-MUTATION WORKER
// =============================================================================

async fn mutation_worker<G, D>(
    engine: Arc<Engine<G, D>>,
    mut queue: mpsc::UnboundedReceiver<Job>,
    jobs: mpsc::WeakUnboundedSender<Job>,
) where
    G: GraphStore + ?Sized + 'static,
    D: DocumentStore + ?Sized + 'static,
{
    while let Some(Job { action, reply }) = queue.recv().await {
        action.status.started(&action);

        let mutated = {
            let engine = Arc::clone(&engine);
            let action = Arc::clone(&action);
            run_blocking(move || engine.mutate(&action)).await
        };

        match mutated {
            Ok(recomputes) => {
                tokio::spawn(run_batch(
                    Arc::clone(&engine),
                    jobs.clone(),
                    action,
                    recomputes,
                    reply,
                ));
            }
            Err(error) => {
                tracing::error!(hash = action.hash(), id = %action.id, error = %error, "graph mutation failed");
                let result = DegraphmalizeResult {
                    action: Arc::clone(&action),
                    outcome: DegraphmalizeOutcome::Failed(error),
                    resubmitted: Vec::new(),
                };
                action.status.exception(&result);
                if reply.send(result).is_err() {
                    tracing::trace!(hash = action.hash(), "handle dropped, mutation failure discarded");
                }
            }
        }
    }
    tracing::info!("graph-mutation worker stopped");
}

impl<G, D> Engine<G, D>
where
    G: GraphStore + ?Sized,
    D: DocumentStore + ?Sized,
{
    /// Extract, compute pre-context, commit, compute post-context.
    /// Returns the recomputes to schedule.
    fn mutate(&self, action: &DegraphmalizeAction) -> Result<Vec<RecomputeAction>, DgmError> {
        let (id, subgraph) = match action.action_type {
            ActionType::Update => {
                let Some(document) = self.documents.fetch(&action.id)? else {
                    tracing::warn!(id = %action.id, "document to update is missing, nothing to do");
                    return Ok(Vec::new());
                };
                let parts = action
                    .configs
                    .iter()
                    .map(|config| config.extract(&document))
                    .collect::<Result<Vec<_>, _>>()?;
                let (subgraph, _) = merge(parts);
                (document.id, subgraph)
            }
            ActionType::Delete => (action.id.clone(), Subgraph::default()),
        };

        let mut graph = self.graph.write();
        let pre = self.context(&*graph, &id)?;
        match action.action_type {
            ActionType::Update => {
                SubgraphManager::commit_subgraph(&mut *graph, &id, &subgraph)?;
            }
            ActionType::Delete => {
                SubgraphManager::delete_subgraph(&mut *graph, &id)?;
            }
        }
        let post = self.context(&*graph, &id)?;
        drop(graph);

        let affected = affected_set(&id, pre, post);
        tracing::debug!(hash = action.hash(), id = %id, affected = affected.len(), "context computed");

        let mut recomputes = Vec::new();
        for (index, root) in affected.into_iter().enumerate() {
            let configs = if index == 0 {
                action.configs.clone()
            } else {
                self.configuration.configs_for(root.index(), root.type_name())
            };
            for config in configs {
                recomputes.push(RecomputeAction {
                    root: root.clone(),
                    config,
                    parent: Some(action.hash.clone()),
                });
            }
        }
        Ok(recomputes)
    }

    fn context(&self, graph: &G, id: &DocumentId) -> Result<Vec<DocumentId>, DgmError> {
        match graph.find_vertex(id)? {
            Some(vertex) => reachable_documents(graph, vertex, self.settings.context_depth),
            None => Ok(Vec::new()),
        }
    }
}

/// `id` first, then the union of both contexts without `id`, one entry per
/// logical document. Post-context versions win.
fn affected_set(id: &DocumentId, pre: Vec<DocumentId>, post: Vec<DocumentId>) -> Vec<DocumentId> {
    let mut order: Vec<DocumentKey> = Vec::new();
    let mut latest: BTreeMap<DocumentKey, DocumentId> = BTreeMap::new();
    let own = id.key();
    for other in pre.into_iter().chain(post) {
        let key = other.key();
        if key == own {
            continue;
        }
        if latest.insert(key.clone(), other).is_none() {
            order.push(key);
        }
    }
    let mut affected = vec![id.clone()];
    affected.extend(order.into_iter().filter_map(|key| latest.remove(&key)));
    affected
}

// =============================================================================
// RECOMPUTE BATCH
// =============================================================================

async fn run_batch<G, D>(
    engine: Arc<Engine<G, D>>,
    jobs: mpsc::WeakUnboundedSender<Job>,
    action: Arc<DegraphmalizeAction>,
    recomputes: Vec<RecomputeAction>,
    reply: oneshot::Sender<DegraphmalizeResult>,
) where
    G: GraphStore + ?Sized + 'static,
    D: DocumentStore + ?Sized + 'static,
{
    let scheduled = recomputes.len();
    let mut tasks = JoinSet::new();
    for (position, recompute) in recomputes.into_iter().enumerate() {
        action.status.recompute_started(&recompute);
        let recomputer = engine.recomputer.clone();
        tasks.spawn(async move { (position, recomputer.recompute_isolated(recompute).await) });
    }

    let mut slots: Vec<Option<RecomputeResult>> = Vec::with_capacity(scheduled);
    slots.resize_with(scheduled, || None);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((position, result)) => {
                action.status.recompute_complete(&result);
                slots[position] = Some(result);
            }
            Err(error) => tracing::error!(hash = action.hash(), error = %error, "recompute task lost"),
        }
    }
    let results: Vec<RecomputeResult> = slots.into_iter().flatten().collect();

    let resubmitted = resubmit_expired(&engine, &jobs, &action, &results);
    let result = DegraphmalizeResult {
        action: Arc::clone(&action),
        outcome: DegraphmalizeOutcome::Complete(results),
        resubmitted,
    };
    tracing::debug!(hash = action.hash(), scheduled, "batch resolved");
    action.status.complete(&result);
    if reply.send(result).is_err() {
        tracing::trace!(hash = action.hash(), "handle dropped, batch result discarded");
    }
}

fn resubmit_expired<G: ?Sized, D: ?Sized>(
    engine: &Engine<G, D>,
    jobs: &mpsc::WeakUnboundedSender<Job>,
    action: &DegraphmalizeAction,
    results: &[RecomputeResult],
) -> Vec<DegraphmalizeHandle> {
    let mut seen = BTreeSet::new();
    let stale: Vec<&DocumentId> = results
        .iter()
        .flat_map(RecomputeResult::expired)
        .filter(|id| seen.insert(id.key()))
        .collect();
    if stale.is_empty() {
        return Vec::new();
    }
    if action.cascade >= engine.settings.max_expiry_cascade {
        tracing::warn!(
            hash = action.hash(),
            stale = stale.len(),
            cascade = action.cascade,
            "expiry cascade bound reached, not resubmitting"
        );
        return Vec::new();
    }
    let Some(jobs) = jobs.upgrade() else {
        tracing::warn!(hash = action.hash(), "engine stopped, expired documents not resubmitted");
        return Vec::new();
    };

    let mut handles = Vec::new();
    for id in stale {
        let configs = engine.configuration.configs_for(id.index(), id.type_name());
        if configs.is_empty() {
            tracing::debug!(id = %id, "no configuration for expired document");
            continue;
        }
        tracing::info!(id = %id, cascade = action.cascade + 1, "resubmitting expired document");
        handles.push(enqueue(
            engine,
            &jobs,
            ActionType::Update,
            id.clone(),
            configs,
            action.cascade + 1,
            Arc::clone(&action.status),
        ));
    }
    handles
}

// =============================================================================
// TESTS
// =============================================================================
