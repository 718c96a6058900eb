use std::fmt;

use log::trace;
use mongodb::bson::{Bson, Document};

use crate::{
    cluster::Cluster,
    error::{Error, Result},
    logger,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    Ascending,
    Hashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Min,
    Max,
}

/// A shard key pattern as stored in `config.collections`, e.g. `{region: 1, userId: "hashed"}`.
#[derive(Debug, Clone)]
pub struct ShardKey {
    pattern: Document,
    fields: Vec<(String, KeyMode)>,
}

impl ShardKey {
    pub fn from_pattern(pattern: Document) -> Result<Self> {
        let mut fields = Vec::with_capacity(pattern.len());
        for (field, mode) in &pattern {
            let mode = match mode {
                Bson::String(s) if s == "hashed" => KeyMode::Hashed,
                Bson::Int32(1) | Bson::Int64(1) => KeyMode::Ascending,
                Bson::Double(v) if *v == 1.0 => KeyMode::Ascending,
                _ => return Err(Error::UnsupportedPattern(logger::ext_json(&pattern))),
            };
            fields.push((field.clone(), mode));
        }
        if fields.is_empty()
            || fields.iter().filter(|(_, mode)| *mode == KeyMode::Hashed).count() > 1
        {
            return Err(Error::UnsupportedPattern(logger::ext_json(&pattern)));
        }
        Ok(Self { pattern, fields })
    }

    pub fn pattern(&self) -> &Document {
        &self.pattern
    }

    /// The single hashed component, if any.
    pub fn hashed_field(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|(_, mode)| *mode == KeyMode::Hashed)
            .map(|(field, _)| field.as_str())
    }

    /// Covering projection: the key fields, with `_id` suppressed unless it is one of them.
    pub fn projection(&self) -> Document {
        let mut projection: Document = self
            .fields
            .iter()
            .map(|(field, _)| (field.clone(), Bson::Int32(1)))
            .collect();
        if !projection.contains_key("_id") {
            projection.insert("_id", 0);
        }
        projection
    }

    /// Ascending sort over the key fields; hashed components sort by their raw value.
    pub fn sort(&self) -> Document {
        self.fields
            .iter()
            .map(|(field, _)| (field.clone(), Bson::Int32(1)))
            .collect()
    }

    /// Global minimum or maximum of the key space.
    pub fn bound(&self, bound: Bound) -> Document {
        let value = match bound {
            Bound::Min => Bson::MinKey,
            Bound::Max => Bson::MaxKey,
        };
        self.fields
            .iter()
            .map(|(field, _)| (field.clone(), value.clone()))
            .collect()
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&logger::ext_json(&self.pattern))
    }
}

/// Copy of `doc` with `field` set to `value`, keeping field order.
pub fn replace_value(doc: &Document, field: &str, value: Bson) -> Document {
    let mut replaced = doc.clone();
    // insert on an existing key keeps its position
    replaced.insert(field, value);
    replaced
}

/// Swap the hashed component of a key value for the server-computed hash. Sentinels pass
/// through untouched, their hash would not bound anything.
pub async fn to_hashed_value<C>(cluster: &C, doc: &Document, field: &str) -> Result<Document>
where
    C: Cluster + ?Sized,
{
    let value = doc.get(field).cloned().unwrap_or(Bson::Null);
    if matches!(value, Bson::MinKey | Bson::MaxKey) {
        return Ok(doc.clone());
    }
    let hashed = cluster.hashed_value(&value).await?;
    let translated = replace_value(doc, field, hashed);
    trace!("hashed {} to {}", logger::ext_json(doc), logger::ext_json(&translated));
    Ok(translated)
}
