//! Runtime: collaborators, configuration and the object table
//!
//! A `Runtime` is a cheap, clonable handle. It owns the shared log and
//! sequencer every object reads through, the configuration every manager
//! obeys, and the table that keeps one manager per (stream, type).

use crate::config::RuntimeConfig;
use crate::manager::VersionedObjectManager;
use crate::retry;
use crate::transaction::{TransactionBuilder, Txn};
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tessel_core::{MsgPackSerializer, Result, Sequencer, Serializer, SharedLog, StateMachine, StreamId};
use tracing::debug;

type ObjectTable = HashMap<(StreamId, TypeId), Arc<dyn Any + Send + Sync>>;

struct RuntimeInner {
    log: Arc<dyn SharedLog>,
    sequencer: Arc<dyn Sequencer>,
    config: RuntimeConfig,
    objects: Mutex<ObjectTable>,
}

/// Handle to the object layer
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime over `log` and `sequencer`
    pub fn new(
        log: Arc<dyn SharedLog>,
        sequencer: Arc<dyn Sequencer>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                log,
                sequencer,
                config,
                objects: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Shared log
    pub fn log(&self) -> &Arc<dyn SharedLog> {
        &self.inner.log
    }

    /// Snapshot sequencer
    pub fn sequencer(&self) -> &Arc<dyn Sequencer> {
        &self.inner.sequencer
    }

    /// Configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Begin an outermost transaction
    ///
    /// The caller commits or aborts it; dropping it aborts.
    pub fn begin(&self, builder: TransactionBuilder) -> Result<Txn> {
        Txn::begin(self.clone(), &builder)
    }

    /// Run `body` in a transaction, retrying retryable aborts with backoff
    ///
    /// # Example
    ///
    /// ```ignore
    /// let balance = runtime.transaction(TransactionBuilder::default(), |txn| {
    ///     account.access(Some(txn), None, |a| a.balance)
    /// })?;
    /// ```
    pub fn transaction<R>(
        &self,
        builder: TransactionBuilder,
        body: impl FnMut(&Txn) -> Result<R>,
    ) -> Result<R> {
        retry::run(self, &builder, &self.inner.config.retry, body)
    }

    /// Start building the object stored on `stream`
    pub fn object<T: StateMachine + Default>(&self, stream: StreamId) -> ObjectBuilder<T> {
        ObjectBuilder::new(self.clone(), stream)
    }

    /// Number of open object managers
    pub fn open_objects(&self) -> usize {
        self.inner.objects.lock().len()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("open_objects", &self.open_objects())
            .finish()
    }
}

/// How to instantiate and serialize one object
///
/// Immutable once the manager is open.
pub struct ObjectBuilder<T> {
    stream: StreamId,
    runtime: Runtime,
    serializer: Arc<dyn Serializer>,
    factory: Arc<dyn Fn() -> T + Send + Sync>,
    _type: PhantomData<fn() -> T>,
}

impl<T> Clone for ObjectBuilder<T> {
    fn clone(&self) -> Self {
        Self {
            stream: self.stream,
            runtime: self.runtime.clone(),
            serializer: Arc::clone(&self.serializer),
            factory: Arc::clone(&self.factory),
            _type: PhantomData,
        }
    }
}

impl<T: StateMachine + Default> ObjectBuilder<T> {
    fn new(runtime: Runtime, stream: StreamId) -> Self {
        Self {
            stream,
            runtime,
            serializer: Arc::new(MsgPackSerializer),
            factory: Arc::new(T::default),
            _type: PhantomData,
        }
    }
}

impl<T: StateMachine> ObjectBuilder<T> {
    /// Encode arguments and hash conflict keys with `serializer`
    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Create blank instances with `factory` instead of `Default`
    pub fn with_factory(mut self, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        self.factory = Arc::new(factory);
        self
    }

    /// Stream the object lives on
    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// Owning runtime
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Serializer for arguments and conflict keys
    pub fn serializer(&self) -> &Arc<dyn Serializer> {
        &self.serializer
    }

    /// A fresh, blank instance
    pub fn blank(&self) -> T {
        (self.factory)()
    }

    /// Open the manager for this object
    ///
    /// The runtime keeps one manager per stream and type; opening the same
    /// object twice returns the same manager (and ignores this builder's
    /// serializer and factory).
    pub fn open(self) -> Arc<VersionedObjectManager<T>> {
        let key = (self.stream, TypeId::of::<T>());
        let runtime = self.runtime.clone();
        let mut objects = runtime.inner.objects.lock();
        if let Some(existing) = objects.get(&key) {
            if let Ok(manager) = Arc::clone(existing).downcast::<VersionedObjectManager<T>>() {
                return manager;
            }
        }
        debug!(stream = %self.stream, kind = std::any::type_name::<T>(), "Open object");
        let manager = Arc::new(VersionedObjectManager::new(self));
        objects.insert(key, Arc::clone(&manager) as Arc<dyn Any + Send + Sync>);
        manager
    }
}
