use std::io::Write;

use log::{debug, trace};
use mongodb::{bson::Document, Namespace};

use crate::{
    chunk::ChunkCorrelator,
    cluster::Cluster,
    cursor::OrderedCursor,
    error::{Error, Result},
    logger,
    report::{RangeMetadata, Reporter},
    shard_key::{self, Bound, ShardKey},
};

/// Everything resolved about the collection before the scan starts. Read-only from then on.
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub namespace: Namespace,
    pub shard_key: ShardKey,
    /// selects the collection's documents in `config.chunks`
    pub chunk_filter: Document,
    pub chunk_lookup: bool,
    hashed_field: Option<String>,
}

impl ScanContext {
    pub fn new(
        namespace: Namespace,
        shard_key: ShardKey,
        chunk_filter: Document,
        chunk_lookup: bool,
    ) -> Self {
        let hashed_field = shard_key.hashed_field().map(str::to_string);
        Self {
            namespace,
            shard_key,
            chunk_filter,
            chunk_lookup,
            hashed_field,
        }
    }

    pub fn hashed_field(&self) -> Option<&str> {
        self.hashed_field.as_deref()
    }
}

/// Half-open `[min, max)` between two consecutive distinct key values.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    pub min: Document,
    pub max: Document,
}

/// Turns a sorted stream of key values into consecutive ranges, ending with
/// `[last, MaxKey)`. Repeated values produce no range.
pub struct RangeWalker<K> {
    cursor: K,
    /// lower bound of the next range, with its encoded bytes for duplicate checks
    previous: Option<(Document, Vec<u8>)>,
    upper: Document,
}

impl<K: OrderedCursor<Document>> RangeWalker<K> {
    pub async fn start(mut cursor: K, ctx: &ScanContext) -> Result<Self> {
        let first = cursor
            .next_item()
            .await?
            .ok_or_else(|| Error::EmptyCollection(ctx.namespace.to_string()))?;
        trace!("set min to {}", logger::ext_json(&first));
        let bytes = encode(&first)?;
        Ok(Self {
            cursor,
            previous: Some((first, bytes)),
            upper: ctx.shard_key.bound(Bound::Max),
        })
    }

    pub async fn next_range(&mut self) -> Result<Option<KeyRange>> {
        let Some((min, min_bytes)) = self.previous.take() else {
            return Ok(None);
        };
        while let Some(next) = self.cursor.next_item().await? {
            let bytes = encode(&next)?;
            if bytes == min_bytes {
                trace!("{} repeats, skipping", logger::ext_json(&next));
                continue;
            }
            trace!("set max to {}", logger::ext_json(&next));
            self.previous = Some((next.clone(), bytes));
            return Ok(Some(KeyRange { min, max: next }));
        }
        Ok(Some(KeyRange {
            min,
            max: self.upper.clone(),
        }))
    }
}

fn encode(doc: &Document) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    doc.to_writer(&mut bytes)?;
    Ok(bytes)
}

/// Totals over everything reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub ranges: u64,
    pub documents: i64,
    pub bytes: i64,
}

/// Walk every key range of the collection and report each one, in key order.
pub async fn run<C, W>(
    cluster: &C,
    ctx: &ScanContext,
    reporter: &Reporter<W>,
) -> Result<ScanSummary>
where
    C: Cluster,
    W: Write + Send + 'static,
{
    let mut correlator = if ctx.chunk_lookup {
        Some(ChunkCorrelator::prime(cluster, ctx).await?)
    } else {
        None
    };
    let key_cursor = cluster.key_cursor(ctx).await?;
    let mut walker = RangeWalker::start(key_cursor, ctx).await?;

    let mut summary = ScanSummary::default();
    while let Some(range) = walker.next_range().await? {
        let record = describe(cluster, ctx, correlator.as_mut(), range).await?;
        summary.ranges += 1;
        summary.documents += record.count;
        summary.bytes += record.size;
        reporter.report(record).await?;
    }
    if let Some(correlator) = &correlator {
        debug!(
            "chunk cursor advanced {} times and was repositioned {} times",
            correlator.advances(),
            correlator.repositions()
        );
    }
    Ok(summary)
}

async fn describe<C: Cluster>(
    cluster: &C,
    ctx: &ScanContext,
    correlator: Option<&mut ChunkCorrelator<'_, C>>,
    range: KeyRange,
) -> Result<RangeMetadata> {
    let (min, max, hashed_key) = match ctx.hashed_field() {
        Some(field) => {
            let min = shard_key::to_hashed_value(cluster, &range.min, field).await?;
            let max = shard_key::to_hashed_value(cluster, &range.max, field).await?;
            (min.clone(), max, Some(min))
        }
        None => (range.min.clone(), range.max, None),
    };
    let size = cluster.range_size(ctx, &min, &max).await?;
    let chunk = match correlator {
        Some(correlator) => Some(correlator.owner(&min).await?.clone()),
        None => None,
    };
    Ok(RangeMetadata {
        key: range.min,
        hashed_key,
        size: size.size,
        count: size.count,
        chunk,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chunk::Chunk,
        testing::{context, MockCluster, VecCursor},
    };
    use mongodb::bson::{doc, Bson};

    fn keys(values: &[i32]) -> Vec<Document> {
        values.iter().map(|v| doc! {"x": *v}).collect()
    }

    fn max_x() -> Document {
        doc! {"x": Bson::MaxKey}
    }

    async fn ranges(values: Vec<Document>, ctx: &ScanContext) -> Vec<KeyRange> {
        let mut walker = RangeWalker::start(VecCursor::new(values), ctx).await.unwrap();
        let mut ranges = Vec::new();
        while let Some(range) = walker.next_range().await.unwrap() {
            ranges.push(range);
        }
        ranges
    }

    async fn scan(
        cluster: &MockCluster,
        ctx: &ScanContext,
    ) -> (Result<ScanSummary>, Vec<RangeMetadata>) {
        let reporter = Reporter::new(Vec::new(), false);
        let outcome = run(cluster, ctx, &reporter).await;
        let output = String::from_utf8(reporter.finish().await.unwrap()).unwrap();
        let records = output
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap())
            .map(|value| {
                let doc = Bson::try_from(value).unwrap();
                record_from(doc.as_document().unwrap())
            })
            .collect();
        (outcome, records)
    }

    /// Read back what the reporter wrote, enough to check order and fields.
    fn record_from(doc: &Document) -> RangeMetadata {
        RangeMetadata {
            key: doc.get_document("key").unwrap().clone(),
            hashed_key: doc.get_document("hashedKey").ok().cloned(),
            size: doc.get("size").and_then(crate::util::as_i64).unwrap(),
            count: doc.get("count").and_then(crate::util::as_i64).unwrap(),
            chunk: doc.get_document("chunk").ok().map(|chunk| Chunk {
                shard: doc.get_str("shard").unwrap().to_string(),
                min: chunk.get_document("min").unwrap().clone(),
                max: chunk.get_document("max").unwrap().clone(),
            }),
        }
    }

    #[tokio::test]
    async fn consecutive_values_pair_into_ranges() {
        let ctx = context(doc! {"x": 1});
        assert_eq!(
            ranges(keys(&[1, 5, 9]), &ctx).await,
            [
                KeyRange {
                    min: doc! {"x": 1},
                    max: doc! {"x": 5},
                },
                KeyRange {
                    min: doc! {"x": 5},
                    max: doc! {"x": 9},
                },
                KeyRange {
                    min: doc! {"x": 9},
                    max: max_x(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn duplicate_values_collapse() {
        let ctx = context(doc! {"x": 1});
        assert_eq!(
            ranges(keys(&[1, 1, 2]), &ctx).await,
            [
                KeyRange {
                    min: doc! {"x": 1},
                    max: doc! {"x": 2},
                },
                KeyRange {
                    min: doc! {"x": 2},
                    max: max_x(),
                },
            ]
        );
        assert_eq!(
            ranges(keys(&[3, 3, 3]), &ctx).await,
            [KeyRange {
                min: doc! {"x": 3},
                max: max_x(),
            }]
        );
    }

    #[tokio::test]
    async fn only_bitwise_repeats_collapse() {
        // 1 and 1.0 sort together but are distinct values in the index
        let ctx = context(doc! {"x": 1});
        let values = vec![doc! {"x": 1}, doc! {"x": 1.0}];
        assert_eq!(ranges(values, &ctx).await.len(), 2);
    }

    #[tokio::test]
    async fn tail_range_ends_at_max_key_for_every_field() {
        let ctx = context(doc! {"a": 1, "b": 1});
        let values = vec![doc! {"a": 1, "b": "x"}, doc! {"a": 2, "b": "y"}];
        let ranges = ranges(values, &ctx).await;
        assert_eq!(
            ranges.last().unwrap().max,
            doc! {"a": Bson::MaxKey, "b": Bson::MaxKey}
        );
    }

    #[tokio::test]
    async fn walker_is_done_after_the_tail() {
        let ctx = context(doc! {"x": 1});
        let mut walker = RangeWalker::start(VecCursor::new(keys(&[4])), &ctx)
            .await
            .unwrap();
        assert!(walker.next_range().await.unwrap().is_some());
        assert!(walker.next_range().await.unwrap().is_none());
        assert!(walker.next_range().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_collection_is_an_error() {
        let cluster = MockCluster::new(vec![], vec![]);
        let mut ctx = context(doc! {"x": 1});
        ctx.chunk_lookup = false;
        let (outcome, records) = scan(&cluster, &ctx).await;
        assert!(matches!(outcome, Err(Error::EmptyCollection(ns)) if ns == "test.users"));
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn missing_chunks_are_an_error() {
        let cluster = MockCluster::new(keys(&[1]), vec![]);
        let ctx = context(doc! {"x": 1});
        let (outcome, _) = scan(&cluster, &ctx).await;
        assert!(matches!(outcome, Err(Error::NoChunksFound(_))));
    }

    #[tokio::test]
    async fn reports_sizes_and_owning_chunks_in_key_order() {
        let chunks = vec![
            Chunk {
                shard: "A".to_string(),
                min: doc! {"x": Bson::MinKey},
                max: doc! {"x": 10},
            },
            Chunk {
                shard: "B".to_string(),
                min: doc! {"x": 10},
                max: max_x(),
            },
        ];
        let cluster = MockCluster::new(keys(&[1, 5, 5, 10, 12]), chunks.clone());
        let ctx = context(doc! {"x": 1});
        let (outcome, records) = scan(&cluster, &ctx).await;

        assert_eq!(
            outcome.unwrap(),
            ScanSummary {
                ranges: 4,
                documents: 8,
                bytes: 256
            }
        );
        let summary: Vec<(Document, &str)> = records
            .iter()
            .map(|r| (r.key.clone(), r.chunk.as_ref().unwrap().shard.as_str()))
            .collect();
        assert_eq!(
            summary,
            [
                (doc! {"x": 1}, "A"),
                (doc! {"x": 5}, "A"),
                (doc! {"x": 10}, "B"),
                (doc! {"x": 12}, "B"),
            ]
        );
        assert_eq!(records[0].chunk.as_ref().unwrap(), &chunks[0]);
        assert!(records.iter().all(|r| r.hashed_key.is_none()));
        assert_eq!(
            cluster.sized_ranges(),
            [
                (doc! {"x": 1}, doc! {"x": 5}),
                (doc! {"x": 5}, doc! {"x": 10}),
                (doc! {"x": 10}, doc! {"x": 12}),
                (doc! {"x": 12}, max_x()),
            ]
        );
        assert_eq!(cluster.chunk_cursors_opened(), 1);
    }

    #[tokio::test]
    async fn chunk_fields_are_absent_without_chunk_lookup() {
        let cluster = MockCluster::new(keys(&[1, 2]), vec![]);
        let mut ctx = context(doc! {"x": 1});
        ctx.chunk_lookup = false;
        let (outcome, records) = scan(&cluster, &ctx).await;
        assert_eq!(outcome.unwrap().ranges, 2);
        assert!(records.iter().all(|r| r.chunk.is_none()));
        assert_eq!(cluster.chunk_cursors_opened(), 0);
    }

    #[tokio::test]
    async fn hashed_keys_translate_bounds_but_not_max_key() {
        let chunks = vec![Chunk {
            shard: "A".to_string(),
            min: doc! {"x": Bson::MinKey},
            max: max_x(),
        }];
        let cluster = MockCluster::new(keys(&[3, 4]), chunks);
        let ctx = context(doc! {"x": "hashed"});
        let (outcome, records) = scan(&cluster, &ctx).await;
        outcome.unwrap();

        let hashed = |v: i32| doc! {"x": MockCluster::hash(&Bson::Int32(v))};
        // the file does not keep int32 and int64 apart, compare as written
        let written = |doc: &Document| logger::ext_json(doc);
        assert_eq!(records[0].key, doc! {"x": 3});
        assert_eq!(
            records[0].hashed_key.as_ref().map(written),
            Some(written(&hashed(3)))
        );
        assert_eq!(
            records[1].hashed_key.as_ref().map(written),
            Some(written(&hashed(4)))
        );
        assert_eq!(
            cluster.sized_ranges(),
            [(hashed(3), hashed(4)), (hashed(4), max_x())]
        );
        assert_eq!(
            cluster.hashed_inputs(),
            [Bson::Int32(3), Bson::Int32(4), Bson::Int32(4)]
        );
    }

    #[tokio::test]
    async fn hashed_keys_find_owners_out_of_raw_order() {
        let chunk = |min: Bson, max: Bson, shard: &str| Chunk {
            shard: shard.to_string(),
            min: doc! {"x": min},
            max: doc! {"x": max},
        };
        let chunks = vec![
            chunk(Bson::MinKey, Bson::Int64(3000), "A"),
            chunk(Bson::Int64(3000), Bson::Int64(6000), "B"),
            chunk(Bson::Int64(6000), Bson::MaxKey, "C"),
        ];
        let cluster = MockCluster::new(keys(&[1, 2, 3, 4, 5]), chunks);
        let ctx = context(doc! {"x": "hashed"});
        let (outcome, records) = scan(&cluster, &ctx).await;
        assert_eq!(outcome.unwrap().ranges, 5);

        // hashes go 7001, 4002, 1003, 8004, 5005
        let shards: Vec<&str> = records
            .iter()
            .map(|r| r.chunk.as_ref().unwrap().shard.as_str())
            .collect();
        assert_eq!(shards, ["C", "B", "A", "C", "B"]);
        for (record, v) in records.iter().zip(1..) {
            assert_eq!(record.key, doc! {"x": v});
            assert_eq!(
                record.hashed_key.as_ref().map(logger::ext_json),
                Some(logger::ext_json(
                    &doc! {"x": MockCluster::hash(&Bson::Int32(v))}
                ))
            );
        }
        // the three backward steps reopen the chunk cursor, the forward ones do not
        assert_eq!(cluster.chunk_cursors_opened(), 4);
    }

    #[tokio::test]
    async fn external_failures_stop_the_scan() {
        let mut cluster = MockCluster::new(keys(&[1, 2, 3]), vec![]);
        cluster.fail_range_size = true;
        let mut ctx = context(doc! {"x": 1});
        ctx.chunk_lookup = false;
        let (outcome, records) = scan(&cluster, &ctx).await;
        assert!(matches!(outcome, Err(Error::Reply(_))));
        assert!(records.is_empty());
    }
}
