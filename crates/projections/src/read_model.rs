//! The read model a projector keeps in sync.

use async_trait::async_trait;

use crate::Result;

/// Storage that a projection writes its derived data into.
///
/// Handlers usually buffer changes on the read model through
/// [`HandlerContext::read_model_mut`](crate::HandlerContext::read_model_mut);
/// the projector calls [`persist`](ReadModel::persist) right before every
/// checkpoint so buffered changes and positions are flushed together.
#[async_trait]
pub trait ReadModel: Send + Sync {
    /// Sets up the underlying storage (tables, collections, ...).
    async fn init(&mut self) -> Result<()>;

    async fn is_initialized(&self) -> Result<bool>;

    /// Empties the storage, keeping it initialized.
    async fn reset(&mut self) -> Result<()>;

    /// Removes the storage entirely.
    async fn delete(&mut self) -> Result<()>;

    /// Flushes buffered changes.
    async fn persist(&mut self) -> Result<()>;
}
