use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use mongodb::bson::{doc, Bson, Document};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    chunk::Chunk,
    error::{Error, Result},
};

/// Records the scan may get ahead of the writer by.
const QUEUE_DEPTH: usize = 128;

/// What the result file says about one key range.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeMetadata {
    /// lower bound of the range, as read from the collection
    pub key: Document,
    /// lower bound with the hashed component translated, for hashed shard keys
    pub hashed_key: Option<Document>,
    pub size: i64,
    pub count: i64,
    /// owning chunk, when chunk lookup is on
    pub chunk: Option<Chunk>,
}

impl RangeMetadata {
    pub fn to_document(&self) -> Document {
        let mut doc = doc! {"key": self.key.clone()};
        if let Some(hashed_key) = &self.hashed_key {
            doc.insert("hashedKey", hashed_key.clone());
        }
        doc.insert("size", self.size);
        doc.insert("count", self.count);
        if let Some(chunk) = &self.chunk {
            doc.insert("shard", chunk.shard.clone());
            doc.insert("chunk", doc! {"min": chunk.min.clone(), "max": chunk.max.clone()});
        }
        doc
    }

    pub fn to_json(&self) -> String {
        Bson::Document(self.to_document())
            .into_relaxed_extjson()
            .to_string()
    }
}

/// Hands records to a dedicated writer through a bounded queue, so the scan waits on a
/// slow disk instead of piling records up in memory.
pub struct Reporter<W> {
    tx: mpsc::Sender<RangeMetadata>,
    writer: JoinHandle<Result<W>>,
}

impl Reporter<BufWriter<File>> {
    /// Write to a fresh file at `path`, moving any existing file aside first.
    pub fn create(path: &Path, json_array: bool) -> Result<Self> {
        if path.exists() {
            let backup = backup_path(path);
            fs::rename(path, &backup)?;
            info!("moved existing {} to {}", path.display(), backup.display());
        }
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file), json_array))
    }
}

impl<W: Write + Send + 'static> Reporter<W> {
    pub fn new(sink: W, json_array: bool) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let writer = tokio::task::spawn_blocking(move || write_reports(rx, sink, json_array));
        Self { tx, writer }
    }

    /// Queue one record, waiting while the queue is full.
    pub async fn report(&self, record: RangeMetadata) -> Result<()> {
        self.tx.send(record).await.map_err(|_| Error::ReporterClosed)
    }

    /// Close the queue and wait for the writer to drain and flush it.
    pub async fn finish(self) -> Result<W> {
        debug!("closing reporter queue and waiting for the writer to finish");
        drop(self.tx);
        self.writer.await?
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut backup = path.as_os_str().to_owned();
    backup.push(format!(".{}.bak", chrono::Local::now().to_rfc3339()));
    PathBuf::from(backup)
}

fn write_reports<W: Write>(
    mut rx: mpsc::Receiver<RangeMetadata>,
    mut sink: W,
    json_array: bool,
) -> Result<W> {
    debug!("starting report writer");
    let mut written = 0usize;
    // in array mode a line is held back until we know whether it needs a comma
    let mut pending: Option<String> = None;
    if json_array {
        writeln!(sink, "[")?;
    }
    while let Some(record) = rx.blocking_recv() {
        let line = record.to_json();
        if json_array {
            if let Some(previous) = pending.replace(line) {
                writeln!(sink, "  {},", previous)?;
            }
        } else {
            writeln!(sink, "{}", line)?;
        }
        written += 1;
    }
    if let Some(last) = pending {
        writeln!(sink, "  {}", last)?;
    }
    if json_array {
        writeln!(sink, "]")?;
    }
    sink.flush()?;
    debug!("report writer finished after {} records", written);
    Ok(sink)
}
