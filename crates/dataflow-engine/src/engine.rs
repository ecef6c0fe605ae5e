//! The engine: owner of open projects and their shared collaborators
//!
//! An [`Engine`] holds the node registry, the node type filter, the worker
//! pool and the event dispatcher. Every project it creates or loads shares
//! them but nothing else: projects have their own locks, external values
//! and execution monitor, so work on one project never waits for another.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{EventDispatcher, ListenerId, NodeStateListener};
use crate::persist::{self, LoadResult, ProjectSnapshot};
use crate::pool::WorkerPool;
use crate::registry::{AllowAll, NodeRegistry, NodeTypeFilter};
use crate::types::NodeId;
use crate::workflow::{EngineShared, ProjectContext, WorkflowManager};

/// Dataflow engine managing a set of open projects
pub struct Engine {
    config: EngineConfig,
    shared: Arc<EngineShared>,
    projects: RwLock<BTreeMap<u32, Arc<WorkflowManager>>>,
    next_project: AtomicU32,
}

impl Engine {
    /// Create an engine that allows every registered node type
    pub fn new(config: EngineConfig, registry: NodeRegistry) -> Result<Self> {
        Self::with_filter(config, registry, Arc::new(AllowAll))
    }

    /// Create an engine with a node type policy
    pub fn with_filter(
        config: EngineConfig,
        registry: NodeRegistry,
        filter: Arc<dyn NodeTypeFilter>,
    ) -> Result<Self> {
        let pool = WorkerPool::new(&config)?;
        let dispatcher = EventDispatcher::spawn(pool.handle(), config.event_backlog_warn);
        log::info!(
            "Engine started with {} worker(s) and {} node type(s)",
            config.worker_threads,
            registry.node_types().len()
        );
        Ok(Self {
            config,
            shared: Arc::new(EngineShared {
                registry: Arc::new(registry),
                filter,
                pool,
                dispatcher,
            }),
            projects: RwLock::new(BTreeMap::new()),
            next_project: AtomicU32::new(1),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.shared.registry
    }

    pub fn worker_pool(&self) -> &WorkerPool {
        &self.shared.pool
    }

    fn allocate_id(&self) -> NodeId {
        NodeId::root().child(self.next_project.fetch_add(1, Ordering::Relaxed))
    }

    fn register(&self, project: &Arc<WorkflowManager>) {
        self.projects
            .write()
            .insert(project.id().index(), Arc::clone(project));
    }

    /// Create an empty project
    pub fn create_project(&self, name: &str) -> Arc<WorkflowManager> {
        let context = Arc::new(ProjectContext::new(Arc::clone(&self.shared), Uuid::new_v4()));
        let project = WorkflowManager::new_project(self.allocate_id(), name, context);
        self.register(&project);
        log::info!("Created project {} '{}'", project.id(), name);
        project
    }

    /// Load a project from a snapshot file or a directory containing one
    ///
    /// Runs without touching any other project's lock.
    pub fn load_project(&self, path: impl AsRef<Path>) -> Result<LoadResult> {
        let result = persist::load_file(&self.shared, self.allocate_id(), path.as_ref())?;
        self.register(&result.project);
        Ok(result)
    }

    /// Open a project from an in-memory snapshot
    pub fn open_snapshot(&self, snapshot: ProjectSnapshot) -> Result<LoadResult> {
        let result = persist::open_snapshot(&self.shared, self.allocate_id(), snapshot)?;
        self.register(&result.project);
        log::info!("Opened project {} from snapshot", result.project.id());
        Ok(result)
    }

    /// Save an open project
    pub fn save_project(&self, id: &NodeId, path: impl AsRef<Path>) -> Result<PathBuf> {
        self.require(id)?.save(path.as_ref())
    }

    /// Close a project; rejected while anything in it is in execution
    pub fn close_project(&self, id: &NodeId) -> Result<()> {
        let project = self.require(id)?;
        // Executions start under the project lock, so none can begin in between
        project.with_lock(|| {
            if project.is_in_execution() {
                return Err(EngineError::rejected(format!(
                    "Cannot close project {}: it is in execution",
                    id
                )));
            }
            self.projects.write().remove(&id.index());
            Ok(())
        })?;
        log::info!("Closed project {}", id);
        Ok(())
    }

    /// Open project with the given id
    pub fn project(&self, id: &NodeId) -> Option<Arc<WorkflowManager>> {
        if id.depth() != 2 {
            return None;
        }
        self.projects.read().get(&id.index()).cloned()
    }

    fn require(&self, id: &NodeId) -> Result<Arc<WorkflowManager>> {
        self.project(id).ok_or_else(|| EngineError::NodeNotFound(id.clone()))
    }

    /// All open projects, ordered by id
    pub fn projects(&self) -> Vec<Arc<WorkflowManager>> {
        self.projects.read().values().cloned().collect()
    }

    pub fn open_project_count(&self) -> usize {
        self.projects.read().len()
    }

    /// Locate the workflow directly containing `id`, in any open project
    pub fn find(&self, id: &NodeId) -> Option<(Arc<WorkflowManager>, u32)> {
        let project_id = NodeId::root().child(*id.path().get(1)?);
        self.project(&project_id)?.find(id)
    }

    /// Register a listener for events of every project
    pub fn add_listener(&self, listener: Arc<dyn NodeStateListener>) -> ListenerId {
        self.shared.dispatcher.add_listener(None, listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.dispatcher.remove_listener(id)
    }

    /// Cancel everything in every open project
    pub fn cancel_all(&self) {
        for project in self.projects() {
            project.cancel_all();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.cancel_all();
        let timeout = Duration::from_millis(self.config.shutdown_timeout_ms);
        for project in self.projects() {
            if !project.wait_while_in_execution(timeout) {
                log::error!("Project {} did not stop within {:?}", project.id(), timeout);
            }
        }
        log::info!("Engine stopped");
    }
}
