use futures::TryStreamExt;
use log::{debug, info, trace};
use mongodb::{
    bson::{doc, Bson, Document},
    options::{FindOptions, Hint},
    IndexModel, Namespace,
};
use serde::Deserialize;

use crate::{
    chunk::Chunk,
    error::{Error, Result},
    logger,
    shard_key::{Bound, ShardKey},
    util,
};

/// Entry for a sharded collection in `config.collections`.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionMetadata {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub uuid: Option<Bson>,
    pub key: Document,
}

/// Document count and byte size of one key range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RangeSize {
    pub size: i64,
    pub count: i64,
}

/// connects to instance at uri, specify options and credentials according to mongodb docs
pub async fn connect(uri: &str) -> Result<mongodb::Client> {
    let mut options = mongodb::options::ClientOptions::parse(uri).await?;
    options.app_name = Some("skv".to_string());
    let client = mongodb::Client::with_options(options)?;
    client
        .database("admin")
        .run_command(doc! {"ping": 1}, None)
        .await?;
    info!("Connected to {}", util::redact(uri));
    Ok(client)
}

/// fails with `NotMongos` unless the client points at a mongos process
pub async fn assert_mongos(client: &mongodb::Client) -> Result<()> {
    match client
        .database("admin")
        .run_command(doc! {"isdbgrid": 1}, None)
        .await
    {
        Ok(_) => Ok(()),
        Err(err) if util::is_not_mongos(&err) => Err(Error::NotMongos),
        Err(err) => Err(err.into()),
    }
}

/// major server version, from `buildInfo.versionArray`
pub async fn major_version(client: &mongodb::Client) -> Result<i64> {
    let build_info = client
        .database("admin")
        .run_command(doc! {"buildInfo": 1}, None)
        .await?;
    let major = build_info
        .get_array("versionArray")?
        .first()
        .and_then(util::as_i64)
        .ok_or_else(|| Error::Reply("buildInfo.versionArray is empty".to_string()))?;
    debug!("detected major version: {}", major);
    Ok(major)
}

pub async fn collection_metadata(
    client: &mongodb::Client,
    ns: &Namespace,
) -> Result<CollectionMetadata> {
    let meta = client
        .database("config")
        .collection::<CollectionMetadata>("collections")
        .find_one(doc! {"_id": ns.to_string()}, None)
        .await?;
    let meta = sharded(meta, ns)?;
    debug!(
        "found collection metadata: _id {}, uuid {:?}, key {}",
        meta.id,
        meta.uuid,
        logger::ext_json(&meta.key)
    );
    Ok(meta)
}

/// A namespace without a `config.collections` entry is not sharded.
fn sharded(meta: Option<CollectionMetadata>, ns: &Namespace) -> Result<CollectionMetadata> {
    meta.ok_or_else(|| Error::NotSharded(ns.to_string()))
}

/// Filter selecting the collection's chunks: by uuid from 6.0 on, by namespace before.
pub fn chunk_filter(meta: &CollectionMetadata, major_version: i64) -> Result<Document> {
    if major_version > 5 {
        let uuid = meta
            .uuid
            .clone()
            .ok_or_else(|| Error::Reply(format!("no uuid in metadata for {}", meta.id)))?;
        Ok(doc! {"uuid": uuid})
    } else {
        Ok(doc! {"ns": &meta.id})
    }
}

/// createIndex on the shard key pattern, a no-op when it already exists
pub async fn create_index(
    client: &mongodb::Client,
    ns: &Namespace,
    shard_key: &ShardKey,
) -> Result<String> {
    let index = IndexModel::builder()
        .keys(shard_key.pattern().clone())
        .build();
    let result = client
        .database(&ns.db)
        .collection::<Document>(&ns.coll)
        .create_index(index, None)
        .await?;
    debug!("ran createIndex for '{}'", result.index_name);
    Ok(result.index_name)
}

/// cursor over every shard key value, covered by the shard key index and sorted by it
pub async fn find_key_values(
    client: &mongodb::Client,
    ns: &Namespace,
    shard_key: &ShardKey,
) -> Result<mongodb::Cursor<Document>> {
    let projection = shard_key.projection();
    debug!("made projection document: {}", logger::ext_json(&projection));
    let options = FindOptions::builder()
        .projection(projection)
        .hint(Hint::Keys(shard_key.pattern().clone()))
        .min(shard_key.bound(Bound::Min))
        .sort(shard_key.sort())
        .build();
    let cursor = client
        .database(&ns.db)
        .collection::<Document>(&ns.coll)
        .find(None, options)
        .await?;
    Ok(cursor)
}

/// cursor over the collection's chunks, ascending by `min`
pub async fn find_chunks(
    client: &mongodb::Client,
    filter: &Document,
    after: Option<&Document>,
) -> Result<mongodb::Cursor<Chunk>> {
    let filter = chunk_query(filter, after);
    debug!("getting chunk cursor with filter: {}", logger::ext_json(&filter));
    let options = FindOptions::builder()
        .sort(doc! {"min": 1})
        .no_cursor_timeout(true)
        .build();
    let cursor = client
        .database("config")
        .collection::<Chunk>("chunks")
        .find(filter, options)
        .await?;
    Ok(cursor)
}

/// Narrow the chunk filter to chunks ending after `after`, so the first one returned owns it.
fn chunk_query(filter: &Document, after: Option<&Document>) -> Document {
    let mut query = filter.clone();
    if let Some(value) = after {
        query.insert("max", doc! {"$gt": value.clone()});
    }
    query
}

/// the server's hashed index key for a single value
pub async fn hashed_value(client: &mongodb::Client, value: &Bson) -> Result<Bson> {
    let pipeline = vec![
        doc! {"$documents": [{"value": value.clone()}]},
        doc! {"$addFields": {"hashedValue": {"$toHashedIndexKey": "$value"}}},
    ];
    let results: Vec<Document> = client
        .database("admin")
        .aggregate(pipeline, None)
        .await?
        .try_collect()
        .await?;
    hashed_from_results(results)
}

fn hashed_from_results(mut results: Vec<Document>) -> Result<Bson> {
    if results.len() != 1 {
        return Err(Error::UnexpectedCardinality {
            expected: 1,
            actual: results.len(),
        });
    }
    results
        .swap_remove(0)
        .remove("hashedValue")
        .ok_or_else(|| Error::Reply("$toHashedIndexKey returned no hashedValue".to_string()))
}

/// `dataSize` over `[min, max)` of the shard key index
pub async fn data_size(
    client: &mongodb::Client,
    ns: &Namespace,
    shard_key: &ShardKey,
    min: &Document,
    max: &Document,
) -> Result<RangeSize> {
    let command = doc! {
        "dataSize": ns.to_string(),
        "keyPattern": shard_key.pattern().clone(),
        "min": min.clone(),
        "max": max.clone(),
    };
    trace!("sending command: {}", logger::ext_json(&command));
    let reply = client.database(&ns.db).run_command(command, None).await?;
    trace!("received dataSize result: {}", logger::ext_json(&reply));
    range_size(&reply)
}

fn range_size(reply: &Document) -> Result<RangeSize> {
    let counter = |name: &str| {
        reply
            .get(name)
            .and_then(util::as_i64)
            .ok_or_else(|| Error::Reply(format!("dataSize reply has no numeric '{}'", name)))
    };
    Ok(RangeSize {
        size: counter("size")?,
        count: counter("numObjects")?,
    })
}
