//! Node model and factory traits
//!
//! A [`NodeModel`] holds the behavior of one leaf node: it validates its
//! settings against the specs on its inputs during configure, and turns
//! input values into output values during execute. Models are shared
//! behind `Arc` so a worker thread can run them without holding any
//! workflow lock.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::descriptor::NodeDescriptor;
use crate::error::{EngineError, Result};
use crate::events::{NodeProgressEvent, ProgressSender};
use crate::types::{NodeId, PortSpec, PortValue};
use crate::values::ExternalValues;

/// Behavior of a leaf node
pub trait NodeModel: Send + Sync {
    /// Validate settings and input specs, returning one spec per output
    ///
    /// Unconnected optional inputs are `None`. Errors leave the node idle
    /// with the error text attached as its message.
    fn configure(&self, ctx: &ConfigureContext<'_>) -> Result<Vec<Option<PortSpec>>>;

    /// Compute output values from input values
    ///
    /// Runs on a worker thread. Long-running models should poll
    /// [`ExecutionContext::check_canceled`].
    fn execute(&self, inputs: &[Option<PortValue>], ctx: &ExecutionContext) -> Result<Vec<PortValue>>;

    /// Drop any state kept from the last execution
    fn reset(&self) {}

    /// Internal state to persist alongside executed outputs
    fn save_internals(&self) -> Option<serde_json::Value> {
        None
    }

    /// Restore internal state when an executed node is loaded
    fn load_internals(&self, _internals: &serde_json::Value) -> Result<()> {
        Ok(())
    }
}

/// Creates models of one node type
pub trait NodeFactory: Send + Sync {
    /// Static metadata for this node type
    fn descriptor(&self) -> NodeDescriptor;

    /// Create a fresh model instance
    fn create_model(&self) -> Arc<dyn NodeModel>;
}

/// Factory built from a descriptor and a constructor closure
pub struct FnNodeFactory {
    descriptor: NodeDescriptor,
    create: Box<dyn Fn() -> Arc<dyn NodeModel> + Send + Sync>,
}

impl FnNodeFactory {
    pub fn new<F>(descriptor: NodeDescriptor, create: F) -> Self
    where
        F: Fn() -> Arc<dyn NodeModel> + Send + Sync + 'static,
    {
        Self {
            descriptor,
            create: Box::new(create),
        }
    }
}

impl NodeFactory for FnNodeFactory {
    fn descriptor(&self) -> NodeDescriptor {
        self.descriptor.clone()
    }

    fn create_model(&self) -> Arc<dyn NodeModel> {
        (self.create)()
    }
}

/// Inputs to [`NodeModel::configure`]
pub struct ConfigureContext<'a> {
    node_id: &'a NodeId,
    settings: &'a serde_json::Value,
    input_specs: &'a [Option<PortSpec>],
    values: &'a ExternalValues,
    warning: Mutex<Option<String>>,
}

impl<'a> ConfigureContext<'a> {
    pub fn new(
        node_id: &'a NodeId,
        settings: &'a serde_json::Value,
        input_specs: &'a [Option<PortSpec>],
        values: &'a ExternalValues,
    ) -> Self {
        Self {
            node_id,
            settings,
            input_specs,
            values,
            warning: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        self.node_id
    }

    pub fn settings(&self) -> &serde_json::Value {
        self.settings
    }

    /// Spec on input `port`, `None` when the port is unconnected
    pub fn input_spec(&self, port: usize) -> Option<&PortSpec> {
        self.input_specs.get(port).and_then(|s| s.as_ref())
    }

    pub fn input_specs(&self) -> &[Option<PortSpec>] {
        self.input_specs
    }

    /// Current JSON view of an external value
    pub fn external_value(&self, name: &str) -> Option<serde_json::Value> {
        self.values.get_json(name)
    }

    /// Attach a warning; configuration still succeeds
    pub fn set_warning(&self, message: impl Into<String>) {
        *self.warning.lock() = Some(message.into());
    }

    pub(crate) fn take_warning(&self) -> Option<String> {
        self.warning.lock().take()
    }
}

/// Per-unit context handed to [`NodeModel::execute`]
///
/// Carries everything a worker needs about the node it runs, so nothing is
/// inherited through thread-local state.
pub struct ExecutionContext {
    node_id: NodeId,
    settings: serde_json::Value,
    values: Arc<ExternalValues>,
    cancel: CancellationToken,
    warning: Mutex<Option<String>>,
    progress: Mutex<Option<f64>>,
    progress_sender: Option<ProgressSender>,
}

impl ExecutionContext {
    pub fn new(
        node_id: NodeId,
        settings: serde_json::Value,
        values: Arc<ExternalValues>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            node_id,
            settings,
            values,
            cancel,
            warning: Mutex::new(None),
            progress: Mutex::new(None),
            progress_sender: None,
        }
    }

    /// Deliver reported progress to listeners through `sender`
    pub fn with_progress_sender(mut self, sender: ProgressSender) -> Self {
        self.progress_sender = Some(sender);
        self
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn settings(&self) -> &serde_json::Value {
        &self.settings
    }

    /// Current JSON view of an external value
    pub fn external_value(&self, name: &str) -> Option<serde_json::Value> {
        self.values.get_json(name)
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Return `Err(Cancelled)` once cancellation was requested
    pub fn check_canceled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for up to `duration`, waking early on cancellation
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let deadline = std::time::Instant::now() + duration;
        while std::time::Instant::now() < deadline {
            self.check_canceled()?;
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            std::thread::sleep(remaining.min(Duration::from_millis(5)));
        }
        self.check_canceled()
    }

    /// Attach a warning to the executed node
    pub fn set_warning(&self, message: impl Into<String>) {
        *self.warning.lock() = Some(message.into());
    }

    pub(crate) fn take_warning(&self) -> Option<String> {
        self.warning.lock().take()
    }

    /// Report the fraction of work done, clamped to `0..=1`
    ///
    /// NaN is ignored. Listeners receive the report after the node's
    /// executing event and before its executed event.
    pub fn set_progress(&self, progress: f64, message: Option<String>) {
        if progress.is_nan() {
            return;
        }
        let progress = progress.clamp(0.0, 1.0);
        *self.progress.lock() = Some(progress);
        if let Some(sender) = &self.progress_sender {
            sender.send(NodeProgressEvent::new(self.node_id.clone(), progress, message));
        }
    }

    /// Last progress reported, if any
    pub fn progress(&self) -> Option<f64> {
        *self.progress.lock()
    }
}

/// Inert stand-in for a node type that is unknown or not allowed
///
/// Keeps the port layout of the original node so connections survive, but
/// never configures and never executes.
pub struct PlaceholderModel {
    reason: String,
}

impl PlaceholderModel {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl NodeModel for PlaceholderModel {
    fn configure(&self, _ctx: &ConfigureContext<'_>) -> Result<Vec<Option<PortSpec>>> {
        Err(EngineError::invalid_settings(self.reason.clone()))
    }

    fn execute(&self, _inputs: &[Option<PortValue>], _ctx: &ExecutionContext) -> Result<Vec<PortValue>> {
        Err(EngineError::failed(self.reason.clone()))
    }
}
