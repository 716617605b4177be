//! Read model projector: tails streams and folds their events into state
//! and a read model, checkpointing as it goes.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, TimeDelta, Utc};
use common::ProjectionName;
use event_store::{EventEnvelope, EventStore, EventStoreError, StreamName, Version};
use futures_util::TryStreamExt;
use serde_json::Value;

use crate::checkpoint::{Checkpoint, CheckpointStore, empty_state};
use crate::context::HandlerContext;
use crate::options::ProjectorOptions;
use crate::read_model::ReadModel;
use crate::{ProjectionError, ProjectionStatus, Result};

/// An event handler.
///
/// Receives the current state and returns the new one; `None`, or anything
/// other than a JSON object, leaves the state as it was.
pub type Handler<R> = Box<
    dyn FnMut(&Value, &EventEnvelope, &mut HandlerContext<'_, R>) -> Option<Value> + Send + Sync,
>;

type InitCallback = Box<dyn Fn() -> Value + Send + Sync>;

/// Boxes a closure as a [`Handler`], pinning down its signature.
pub fn handler<R, F>(f: F) -> Handler<R>
where
    F: FnMut(&Value, &EventEnvelope, &mut HandlerContext<'_, R>) -> Option<Value>
        + Send
        + Sync
        + 'static,
{
    Box::new(f)
}

#[derive(Debug, Clone)]
enum Query {
    Streams(Vec<StreamName>),
    Categories(Vec<String>),
    All,
}

enum Handlers<R> {
    Any(Handler<R>),
    ByName(HashMap<String, Handler<R>>),
}

/// Runs one named projection.
///
/// Configure it once with [`init`](Self::init), exactly one of the
/// `from_*` methods and exactly one of [`when`](Self::when) /
/// [`when_any`](Self::when_any), then [`run`](Self::run) it. Only one
/// runner per name makes progress at a time: the others fail to take the
/// lease on the checkpoint row.
pub struct ReadModelProjector<S, C, R> {
    name: ProjectionName,
    event_store: S,
    checkpoints: C,
    read_model: R,
    options: ProjectorOptions,
    status: ProjectionStatus,
    state: Value,
    positions: BTreeMap<String, i64>,
    init: Option<InitCallback>,
    query: Option<Query>,
    handlers: Option<Handlers<R>>,
    stopped: bool,
    event_counter: usize,
}

impl<S, C, R> ReadModelProjector<S, C, R>
where
    S: EventStore,
    C: CheckpointStore,
    R: ReadModel + 'static,
{
    pub fn new(
        name: ProjectionName,
        event_store: S,
        checkpoints: C,
        read_model: R,
        options: ProjectorOptions,
    ) -> Result<Self> {
        options.validate()?;

        Ok(Self {
            name,
            event_store,
            checkpoints,
            read_model,
            options,
            status: ProjectionStatus::Idle,
            state: empty_state(),
            positions: BTreeMap::new(),
            init: None,
            query: None,
            handlers: None,
            stopped: false,
            event_counter: 0,
        })
    }

    /// Sets the initial state factory and seeds the state with it.
    pub fn init<F>(mut self, f: F) -> Result<Self>
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        if self.init.is_some() {
            return Err(ProjectionError::AlreadyInitialized);
        }

        let state = f();
        if state.is_object() {
            self.state = state;
        }
        self.init = Some(Box::new(f));
        Ok(self)
    }

    pub fn from_stream(self, stream_name: StreamName) -> Result<Self> {
        self.from_streams([stream_name])
    }

    pub fn from_streams(self, stream_names: impl IntoIterator<Item = StreamName>) -> Result<Self> {
        self.set_query(Query::Streams(stream_names.into_iter().collect()))
    }

    pub fn from_category(self, category: impl Into<String>) -> Result<Self> {
        self.from_categories([category])
    }

    pub fn from_categories<I, T>(self, categories: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let categories: Vec<String> = categories.into_iter().map(Into::into).collect();
        if categories.iter().any(String::is_empty) {
            return Err(ProjectionError::InvalidArgument(
                "category must not be empty".to_string(),
            ));
        }
        self.set_query(Query::Categories(categories))
    }

    /// Tracks every stream except internal (`$`-prefixed) ones, including
    /// streams created while running.
    pub fn from_all(self) -> Result<Self> {
        self.set_query(Query::All)
    }

    /// Dispatches events by name; events without a handler only advance the
    /// position.
    pub fn when<I, K>(mut self, handlers: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Handler<R>)>,
        K: Into<String>,
    {
        if self.handlers.is_some() {
            return Err(ProjectionError::HandlersAlreadyConfigured);
        }

        let handlers: HashMap<String, Handler<R>> = handlers
            .into_iter()
            .map(|(name, handler)| (name.into(), handler))
            .collect();
        if handlers.keys().any(String::is_empty) {
            return Err(ProjectionError::InvalidArgument(
                "event name must not be empty".to_string(),
            ));
        }

        self.handlers = Some(Handlers::ByName(handlers));
        Ok(self)
    }

    /// Dispatches every event to one handler.
    pub fn when_any<F>(mut self, f: F) -> Result<Self>
    where
        F: FnMut(&Value, &EventEnvelope, &mut HandlerContext<'_, R>) -> Option<Value>
            + Send
            + Sync
            + 'static,
    {
        if self.handlers.is_some() {
            return Err(ProjectionError::HandlersAlreadyConfigured);
        }
        self.handlers = Some(Handlers::Any(Box::new(f)));
        Ok(self)
    }

    fn set_query(mut self, query: Query) -> Result<Self> {
        if self.query.is_some() {
            return Err(ProjectionError::QueryAlreadyConfigured);
        }
        self.query = Some(query);
        Ok(self)
    }

    pub fn name(&self) -> &ProjectionName {
        &self.name
    }

    pub fn state(&self) -> &Value {
        &self.state
    }

    pub fn read_model(&self) -> &R {
        &self.read_model
    }

    pub fn read_model_mut(&mut self) -> &mut R {
        &mut self.read_model
    }

    /// The status as last seen or written by this runner.
    pub fn status(&self) -> ProjectionStatus {
        self.status
    }

    pub fn positions(&self) -> &BTreeMap<String, i64> {
        &self.positions
    }

    /// Processes the tracked streams.
    ///
    /// With `keep_running` the runner polls until it is stopped, either by a
    /// handler or through the status column; otherwise it makes one pass.
    /// Fails with `LockContention` when another runner holds the lease.
    #[tracing::instrument(skip(self), fields(projection = %self.name))]
    pub async fn run(&mut self, keep_running: bool) -> Result<()> {
        if self.query.is_none() {
            return Err(ProjectionError::NotConfigured("no query configured"));
        }
        if self.handlers.is_none() {
            return Err(ProjectionError::NotConfigured("no handlers configured"));
        }

        match self.fetch_remote_status().await? {
            ProjectionStatus::Stopping => {
                self.stop().await?;
                return Ok(());
            }
            ProjectionStatus::Deleting => {
                self.delete(false).await?;
                return Ok(());
            }
            ProjectionStatus::DeletingInclEmittedEvents => {
                self.delete(true).await?;
                return Ok(());
            }
            ProjectionStatus::Resetting => self.reset().await?,
            ProjectionStatus::Idle | ProjectionStatus::Running => {}
        }

        self.checkpoints
            .create_projection(&self.name, self.status)
            .await?;
        self.acquire_lock().await?;

        let result = self.run_locked(keep_running).await;

        match (result, self.release_lock().await) {
            (Err(err), Err(release_err)) => {
                tracing::warn!(error = %release_err, "releasing projection lock failed");
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
            (Ok(()), release) => release,
        }
    }

    async fn run_locked(&mut self, keep_running: bool) -> Result<()> {
        if !self.read_model.is_initialized().await? {
            self.read_model.init().await?;
        }

        self.prepare_stream_positions().await?;
        self.load().await?;

        self.stopped = false;

        loop {
            let streams: Vec<String> = self.positions.keys().cloned().collect();
            for stream in streams {
                self.handle_stream(&stream).await?;
                if self.stopped {
                    break;
                }
            }

            if self.event_counter == 0 {
                tokio::time::sleep(self.options.sleep).await;
                self.renew_lock().await?;
            } else {
                self.persist().await?;
            }
            self.event_counter = 0;

            match self.fetch_remote_status().await? {
                ProjectionStatus::Stopping => self.stop().await?,
                ProjectionStatus::Deleting => self.delete(false).await?,
                ProjectionStatus::DeletingInclEmittedEvents => self.delete(true).await?,
                ProjectionStatus::Resetting => self.reset().await?,
                ProjectionStatus::Idle | ProjectionStatus::Running => {}
            }

            self.prepare_stream_positions().await?;

            if !keep_running || self.stopped {
                return Ok(());
            }
        }
    }

    async fn handle_stream(&mut self, stream: &str) -> Result<()> {
        let stream_name = StreamName::new(stream)?;
        let position = self.positions.get(stream).copied().unwrap_or(0);

        let mut events = match self
            .event_store
            .load(&stream_name, Version::new(position + 1), None, None)
            .await
        {
            Ok(events) => events,
            Err(EventStoreError::StreamNotFound(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        loop {
            let event = match events.try_next().await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                // Dropped while being read; picked up again next pass if recreated.
                Err(EventStoreError::StreamNotFound(_)) => break,
                Err(err) => return Err(err.into()),
            };

            self.positions.insert(stream.to_string(), event.no.as_i64());

            if let Some(stop_requested) = self.dispatch(&stream_name, &event) {
                self.event_counter += 1;
                metrics::counter!("projections_events_dispatched").increment(1);

                if stop_requested {
                    self.stop().await?;
                }
                if self.event_counter == self.options.persist_block_size {
                    self.persist().await?;
                    self.event_counter = 0;
                }
            }

            if self.stopped {
                break;
            }
        }

        Ok(())
    }

    /// Calls the matching handler, if any. Returns whether the handler asked
    /// to stop, or `None` when nothing was dispatched.
    fn dispatch(&mut self, stream_name: &StreamName, event: &EventEnvelope) -> Option<bool> {
        let Self {
            handlers,
            read_model,
            state,
            ..
        } = self;

        let handler = match handlers.as_mut()? {
            Handlers::Any(handler) => handler,
            Handlers::ByName(handlers) => handlers.get_mut(&event.event_name)?,
        };

        let mut ctx = HandlerContext::new(read_model, stream_name);
        if let Some(new_state) = handler(state, event, &mut ctx)
            && new_state.is_object()
        {
            *state = new_state;
        }

        Some(ctx.stop_requested())
    }

    /// Clears positions and the read model and restores the initial state.
    #[tracing::instrument(skip(self), fields(projection = %self.name))]
    pub async fn reset(&mut self) -> Result<()> {
        self.positions.clear();
        self.read_model.reset().await?;
        self.state = self.initial_state();

        self.checkpoints
            .reset(&self.name, &self.checkpoint(), self.status)
            .await?;

        tracing::info!("projection reset");
        Ok(())
    }

    /// Stops the run loop and marks the projection idle.
    #[tracing::instrument(skip(self), fields(projection = %self.name))]
    pub async fn stop(&mut self) -> Result<()> {
        self.stopped = true;
        self.checkpoints
            .update_status(&self.name, ProjectionStatus::Idle)
            .await?;
        self.status = ProjectionStatus::Idle;

        tracing::info!("projection stopped");
        Ok(())
    }

    /// Removes the checkpoint row, and the read model too when
    /// `delete_read_model` is set.
    #[tracing::instrument(skip(self), fields(projection = %self.name))]
    pub async fn delete(&mut self, delete_read_model: bool) -> Result<()> {
        self.checkpoints.delete(&self.name).await?;

        if delete_read_model {
            self.read_model.delete().await?;
        }

        self.stopped = true;
        self.state = self.initial_state();
        self.positions.clear();

        tracing::info!(delete_read_model, "projection deleted");
        Ok(())
    }

    async fn fetch_remote_status(&self) -> Result<ProjectionStatus> {
        Ok(self
            .checkpoints
            .fetch_status(&self.name)
            .await?
            .unwrap_or(ProjectionStatus::Running))
    }

    async fn acquire_lock(&mut self) -> Result<()> {
        let now = Utc::now();
        let acquired = self
            .checkpoints
            .acquire_lock(&self.name, now, self.lease_expiry(now))
            .await?;

        if !acquired {
            tracing::warn!("projection lock held by another runner");
            return Err(ProjectionError::LockContention(self.name.clone()));
        }

        self.status = ProjectionStatus::Running;
        tracing::debug!("projection lock acquired");
        Ok(())
    }

    async fn release_lock(&mut self) -> Result<()> {
        self.checkpoints.release_lock(&self.name).await?;
        self.status = ProjectionStatus::Idle;
        tracing::debug!("projection lock released");
        Ok(())
    }

    async fn persist(&mut self) -> Result<()> {
        self.read_model.persist().await?;

        let locked_until = self.lease_expiry(Utc::now());
        self.checkpoints
            .persist(&self.name, &self.checkpoint(), locked_until)
            .await?;

        metrics::counter!("projections_checkpoints_persisted").increment(1);
        tracing::debug!(positions = ?self.positions, "checkpoint persisted");
        Ok(())
    }

    /// Extends the lease while idle, writing the current checkpoint.
    async fn renew_lock(&mut self) -> Result<()> {
        let locked_until = self.lease_expiry(Utc::now());
        self.checkpoints
            .persist(&self.name, &self.checkpoint(), locked_until)
            .await
    }

    async fn load(&mut self) -> Result<()> {
        let Some(checkpoint) = self.checkpoints.load(&self.name).await? else {
            return Ok(());
        };

        self.positions.extend(checkpoint.positions);
        if checkpoint
            .state
            .as_object()
            .is_some_and(|state| !state.is_empty())
        {
            self.state = checkpoint.state;
        }
        Ok(())
    }

    /// Tracks every stream matched by the query at position 0, keeping the
    /// positions of streams already tracked.
    async fn prepare_stream_positions(&mut self) -> Result<()> {
        let streams = match &self.query {
            Some(Query::All) => self.event_store.fetch_all_stream_names().await?,
            Some(Query::Categories(categories)) => {
                self.event_store
                    .fetch_category_stream_names(categories)
                    .await?
            }
            Some(Query::Streams(streams)) => streams.clone(),
            None => Vec::new(),
        };

        let mut positions: BTreeMap<String, i64> = streams
            .into_iter()
            .map(|stream| (String::from(stream), 0))
            .collect();
        positions.extend(std::mem::take(&mut self.positions));
        self.positions = positions;
        Ok(())
    }

    fn initial_state(&self) -> Value {
        self.init
            .as_ref()
            .map(|f| f())
            .filter(Value::is_object)
            .unwrap_or_else(empty_state)
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint::new(self.positions.clone(), self.state.clone())
    }

    fn lease_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.options.lock_timeout)
            .ok()
            .and_then(|timeout| now.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
