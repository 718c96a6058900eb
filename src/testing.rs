//! In-memory stand-ins for the cluster, shared by the unit tests.

use std::cmp::Ordering::Less;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use mongodb::{
    bson::{doc, Bson, Document},
    Namespace,
};

use crate::{
    chunk::Chunk,
    cluster::Cluster,
    compare::compare,
    cursor::OrderedCursor,
    db::RangeSize,
    error::{Error, Result},
    scan::ScanContext,
    shard_key::ShardKey,
    util,
};

pub struct VecCursor<T> {
    items: std::vec::IntoIter<T>,
}

impl<T> VecCursor<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }
}

#[async_trait]
impl<T: Send> OrderedCursor<T> for VecCursor<T> {
    async fn next_item(&mut self) -> Result<Option<T>> {
        Ok(self.items.next())
    }
}

pub fn context(pattern: Document) -> ScanContext {
    ScanContext::new(
        Namespace {
            db: "test".to_string(),
            coll: "users".to_string(),
        },
        ShardKey::from_pattern(pattern).unwrap(),
        doc! {"ns": "test.users"},
        true,
    )
}

#[derive(Default)]
pub struct MockCluster {
    keys: Vec<Document>,
    chunks: Vec<Chunk>,
    pub fail_range_size: bool,
    chunk_opens: AtomicUsize,
    hashed: Mutex<Vec<Bson>>,
    sized: Mutex<Vec<(Document, Document)>>,
}

impl MockCluster {
    pub fn new(keys: Vec<Document>, chunks: Vec<Chunk>) -> Self {
        Self {
            keys,
            chunks,
            ..Default::default()
        }
    }

    /// Stand-in for the server's hash. Like the real one it does not keep the order
    /// of its inputs: 1, 2, 3 hash to 7001, 4002, 1003.
    pub fn hash(value: &Bson) -> Bson {
        let v = util::as_i64(value).unwrap_or(0);
        Bson::Int64((v * 7).rem_euclid(10) * 1000 + v)
    }

    pub fn chunk_cursors_opened(&self) -> usize {
        self.chunk_opens.load(Ordering::SeqCst)
    }

    pub fn hashed_inputs(&self) -> Vec<Bson> {
        self.hashed.lock().unwrap().clone()
    }

    pub fn sized_ranges(&self) -> Vec<(Document, Document)> {
        self.sized.lock().unwrap().clone()
    }
}

#[async_trait]
impl Cluster for MockCluster {
    type KeyCursor = VecCursor<Document>;
    type ChunkCursor = VecCursor<Chunk>;

    async fn key_cursor(&self, _ctx: &ScanContext) -> Result<Self::KeyCursor> {
        Ok(VecCursor::new(self.keys.clone()))
    }

    async fn chunk_cursor(
        &self,
        _ctx: &ScanContext,
        after: Option<&Document>,
    ) -> Result<Self::ChunkCursor> {
        self.chunk_opens.fetch_add(1, Ordering::SeqCst);
        let mut chunks = self.chunks.clone();
        if let Some(value) = after {
            chunks.retain(|chunk| compare(value, &chunk.max).unwrap() == Less);
        }
        Ok(VecCursor::new(chunks))
    }

    async fn hashed_value(&self, value: &Bson) -> Result<Bson> {
        self.hashed.lock().unwrap().push(value.clone());
        Ok(Self::hash(value))
    }

    async fn range_size(
        &self,
        _ctx: &ScanContext,
        min: &Document,
        max: &Document,
    ) -> Result<RangeSize> {
        if self.fail_range_size {
            return Err(Error::Reply("dataSize failed".to_string()));
        }
        self.sized.lock().unwrap().push((min.clone(), max.clone()));
        Ok(RangeSize {
            size: 64,
            count: 2,
        })
    }
}
