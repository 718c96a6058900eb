use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// URI of the mongos, refer to https://www.mongodb.com/docs/manual/reference/connection-string/ for format
    #[arg(long)]
    pub uri: String,

    /// Database name
    #[arg(short, long)]
    pub db: String,

    /// Collection name
    #[arg(short, long)]
    pub coll: String,

    /// Look up the chunk and shard owning each range
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub chunk_lookup: bool,

    /// Do not run createIndex for the shard key before scanning (it no-ops when the index exists)
    #[arg(long)]
    pub skip_index_build: bool,

    /// Write the result file as a JSON array instead of newline delimited documents
    #[arg(long)]
    pub json_array: bool,

    /// Log level
    #[arg(long, value_enum, default_value_t = Verbosity::Info)]
    pub verbosity: Verbosity,

    /// Also append log lines to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Result file, an existing one is kept as a timestamped .bak
    #[arg(long, default_value = "./out.json")]
    pub out: PathBuf,
}

impl Args {
    pub fn namespace(&self) -> mongodb::Namespace {
        mongodb::Namespace {
            db: self.db.clone(),
            coll: self.coll.clone(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Verbosity {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<Verbosity> for log::LevelFilter {
    fn from(verbosity: Verbosity) -> Self {
        match verbosity {
            Verbosity::Error => log::LevelFilter::Error,
            Verbosity::Warn => log::LevelFilter::Warn,
            Verbosity::Info => log::LevelFilter::Info,
            Verbosity::Debug => log::LevelFilter::Debug,
            Verbosity::Trace => log::LevelFilter::Trace,
        }
    }
}

pub fn args() -> Args {
    Args::parse()
}
