use cluster::ShardedCluster;
use error::{Error, Result};
use log::{error, info, warn};
use report::Reporter;

mod chunk;
mod cli;
mod cluster;
mod compare;
mod cursor;
mod db;
mod error;
mod logger;
mod report;
mod scan;
mod shard_key;
#[cfg(test)]
mod testing;
mod util;

#[tokio::main]
async fn main() {
    let args = cli::args();
    if let Err(err) = logger::init(args.verbosity, args.log_file.as_deref()) {
        eprintln!("Error: cannot open log file: {}", err);
        std::process::exit(1);
    }
    if let Err(err) = run(args).await {
        error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(args: cli::Args) -> Result<()> {
    let cluster = ShardedCluster::new(&args.uri).await?;
    let ctx = cluster
        .scan_context(args.namespace(), args.chunk_lookup)
        .await?;
    info!(
        "dumping shard key values for ns {} and shard key {} to {}",
        ctx.namespace,
        ctx.shard_key,
        args.out.display()
    );
    if !args.skip_index_build {
        cluster.ensure_index(&ctx).await?;
    }

    let reporter = Reporter::create(&args.out, args.json_array)?;
    let outcome = scan::run(&cluster, &ctx, &reporter).await;
    // drain what was already queued even when the scan failed
    let written = reporter.finish().await;
    let summary = match (outcome, written) {
        (Ok(summary), Ok(_)) => summary,
        (Err(Error::ReporterClosed), Err(err)) => return Err(err),
        (Err(err), Err(writer_err)) => {
            warn!("report writer also failed: {}", writer_err);
            return Err(err);
        }
        (Err(err), Ok(_)) | (Ok(_), Err(err)) => return Err(err),
    };
    info!(
        "wrote {} ranges covering {} documents and {} bytes to {}",
        summary.ranges,
        summary.documents,
        summary.bytes,
        args.out.display()
    );
    Ok(())
}
