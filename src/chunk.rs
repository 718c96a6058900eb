use std::cmp::Ordering;

use log::{debug, trace, warn};
use mongodb::bson::Document;
use serde::Deserialize;

use crate::{
    cluster::Cluster,
    compare::compare,
    cursor::OrderedCursor,
    error::{Error, Result},
    logger,
    scan::ScanContext,
};

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Chunk {
    pub shard: String,
    pub min: Document,
    pub max: Document,
}

/// Chunks the correlator steps through one at a time before it jumps instead.
const MAX_STEPS: usize = 4;

/// Finds the chunk owning each range by walking the chunk cursor alongside the
/// key values, which normally arrive in the same ascending order. Values that go
/// backwards or jump far ahead reposition the cursor at their chunk instead.
pub struct ChunkCorrelator<'a, C: Cluster> {
    cluster: &'a C,
    ctx: &'a ScanContext,
    cursor: C::ChunkCursor,
    current: Chunk,
    advances: usize,
    repositions: usize,
}

impl<'a, C: Cluster> ChunkCorrelator<'a, C> {
    /// Open the chunk cursor and load its first chunk.
    pub async fn prime(cluster: &'a C, ctx: &'a ScanContext) -> Result<Self> {
        let mut cursor = cluster.chunk_cursor(ctx, None).await?;
        let current = cursor
            .next_item()
            .await?
            .ok_or_else(|| Error::NoChunksFound(ctx.namespace.to_string()))?;
        trace!("first chunk {:?}", current);
        Ok(Self {
            cluster,
            ctx,
            cursor,
            current,
            advances: 0,
            repositions: 0,
        })
    }

    /// The chunk whose `[min, max)` holds `value`.
    pub async fn owner(&mut self, value: &Document) -> Result<&Chunk> {
        let mut steps = 0;
        loop {
            if compare(value, &self.current.min)? == Ordering::Less {
                // values only go backwards when their order differs from chunk order,
                // as with hashed keys
                debug!(
                    "{} sorts before chunk min {}, repositioning chunk cursor",
                    logger::ext_json(value),
                    logger::ext_json(&self.current.min)
                );
                self.reposition(value).await?;
                break;
            }
            if compare(value, &self.current.max)? == Ordering::Less {
                break;
            }
            if steps == MAX_STEPS {
                debug!(
                    "{} is more than {} chunks ahead, repositioning chunk cursor",
                    logger::ext_json(value),
                    MAX_STEPS
                );
                self.reposition(value).await?;
                break;
            }
            match self.cursor.next_item().await? {
                Some(chunk) => {
                    self.current = chunk;
                    self.advances += 1;
                    steps += 1;
                }
                None => {
                    warn!(
                        "{} is past the last chunk max {}, chunks may have changed during the scan",
                        logger::ext_json(value),
                        logger::ext_json(&self.current.max)
                    );
                    break;
                }
            }
        }
        trace!("{} is owned by {:?}", logger::ext_json(value), self.current);
        Ok(&self.current)
    }

    /// Reopen the chunk cursor at the first chunk ending after `value`.
    async fn reposition(&mut self, value: &Document) -> Result<()> {
        let mut cursor = self.cluster.chunk_cursor(self.ctx, Some(value)).await?;
        self.repositions += 1;
        match cursor.next_item().await? {
            Some(chunk) => {
                self.cursor = cursor;
                self.current = chunk;
            }
            None => warn!(
                "no chunk ends after {}, chunks may have changed during the scan",
                logger::ext_json(value)
            ),
        }
        Ok(())
    }

    /// How many times the cursor moved past a chunk.
    pub fn advances(&self) -> usize {
        self.advances
    }

    /// How many times the cursor was reopened at a value.
    pub fn repositions(&self) -> usize {
        self.repositions
    }
}
