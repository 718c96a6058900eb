use async_trait::async_trait;
use mongodb::{
    bson::{Bson, Document},
    Namespace,
};

use crate::{
    chunk::Chunk,
    cursor::OrderedCursor,
    db::{self, RangeSize},
    error::Result,
    scan::ScanContext,
    shard_key::ShardKey,
};

/// The requests the scan makes against the cluster.
#[async_trait]
pub trait Cluster: Send + Sync {
    type KeyCursor: OrderedCursor<Document>;
    type ChunkCursor: OrderedCursor<Chunk>;

    /// every shard key value in the collection, ascending
    async fn key_cursor(&self, ctx: &ScanContext) -> Result<Self::KeyCursor>;

    /// the collection's chunks, ascending by `min`, from the first chunk ending
    /// after `after` when given
    async fn chunk_cursor(
        &self,
        ctx: &ScanContext,
        after: Option<&Document>,
    ) -> Result<Self::ChunkCursor>;

    /// server-computed hashed index key of one value
    async fn hashed_value(&self, value: &Bson) -> Result<Bson>;

    /// documents and bytes in `[min, max)`
    async fn range_size(
        &self,
        ctx: &ScanContext,
        min: &Document,
        max: &Document,
    ) -> Result<RangeSize>;
}

pub struct ShardedCluster {
    pub router: mongodb::Client,
}

impl ShardedCluster {
    /// connect to the mongos at uri, failing if it is anything else
    pub async fn new(uri: &str) -> Result<Self> {
        let router = db::connect(uri).await?;
        db::assert_mongos(&router).await?;
        Ok(Self { router })
    }

    /// resolve everything the scan needs to know about `ns` up front
    pub async fn scan_context(&self, ns: Namespace, chunk_lookup: bool) -> Result<ScanContext> {
        let meta = db::collection_metadata(&self.router, &ns).await?;
        let major = db::major_version(&self.router).await?;
        let chunk_filter = db::chunk_filter(&meta, major)?;
        let shard_key = ShardKey::from_pattern(meta.key)?;
        Ok(ScanContext::new(ns, shard_key, chunk_filter, chunk_lookup))
    }

    pub async fn ensure_index(&self, ctx: &ScanContext) -> Result<()> {
        db::create_index(&self.router, &ctx.namespace, &ctx.shard_key).await?;
        Ok(())
    }
}

#[async_trait]
impl Cluster for ShardedCluster {
    type KeyCursor = mongodb::Cursor<Document>;
    type ChunkCursor = mongodb::Cursor<Chunk>;

    async fn key_cursor(&self, ctx: &ScanContext) -> Result<Self::KeyCursor> {
        db::find_key_values(&self.router, &ctx.namespace, &ctx.shard_key).await
    }

    async fn chunk_cursor(
        &self,
        ctx: &ScanContext,
        after: Option<&Document>,
    ) -> Result<Self::ChunkCursor> {
        db::find_chunks(&self.router, &ctx.chunk_filter, after).await
    }

    async fn hashed_value(&self, value: &Bson) -> Result<Bson> {
        db::hashed_value(&self.router, value).await
    }

    async fn range_size(
        &self,
        ctx: &ScanContext,
        min: &Document,
        max: &Document,
    ) -> Result<RangeSize> {
        db::data_size(&self.router, &ctx.namespace, &ctx.shard_key, min, max).await
    }
}
