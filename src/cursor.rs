use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::Result;

/// Forward-only cursor over results already sorted by the server.
#[async_trait]
pub trait OrderedCursor<T>: Send {
    /// `None` once the cursor is exhausted.
    async fn next_item(&mut self) -> Result<Option<T>>;
}

#[async_trait]
impl<T> OrderedCursor<T> for mongodb::Cursor<T>
where
    T: DeserializeOwned + Send + Sync + Unpin,
{
    async fn next_item(&mut self) -> Result<Option<T>> {
        if !self.advance().await? {
            return Ok(None);
        }
        Ok(Some(self.deserialize_current()?))
    }
}
