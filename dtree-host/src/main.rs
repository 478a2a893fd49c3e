//! `dtree-inspect`: a standalone diagnostic binary for one container's
//! tree, independent of any running SQL front-end (spec.md §6).
//!
//! Bootstrap follows `host/src/main.rs`'s shape: `env_logger` init from a
//! `--log-level` flag, a config path resolved from an environment
//! variable with a compiled-in default, then dispatch into the actual
//! work.

mod inspect;
mod transport;

use std::process::ExitCode;
use std::sync::Arc;

use structopt::StructOpt;

use dtree_cache::NodeCache;
use dtree_client::{ClusterDescriptor, FeatureFlags, RpcMvkvsClient};
use dtree_generic::{Cid, Oid, Tid};
use dtree_transact::Transaction;

use inspect::Options;
use transport::TcpTransport;

#[derive(StructOpt)]
#[structopt(
    name = "dtree-inspect",
    about = "Dump and check the invariants of a dtree container"
)]
struct Opt {
    /// Run the (I3)/(I4) fence and sibling invariant checker while walking.
    #[structopt(short = "c")]
    check: bool,

    /// Print raw oids instead of resolved node references.
    #[structopt(short = "r")]
    raw: bool,

    /// Print one summary line per node instead of a full dump.
    #[structopt(short = "s")]
    summary: bool,

    /// Path to the cluster descriptor TOML file. Defaults to `GAIACONFIG`
    /// or the compiled-in path when unset.
    #[structopt(long = "config")]
    config: Option<std::path::PathBuf>,

    /// `env_logger` filter, e.g. "warn" or "dtree_cursor=debug".
    #[structopt(long = "log-level", default_value = "warn")]
    log_level: String,

    /// The container to inspect.
    container_id: u64,

    /// A single node within the container; omit to walk the whole tree
    /// from its root.
    object_id: Option<u64>,
}

type MainError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[tokio::main]
async fn main() -> Result<ExitCode, MainError> {
    let mut opt = Opt::from_args();
    let log_level = std::mem::take(&mut opt.log_level);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let descriptor = match &opt.config {
        Some(path) => ClusterDescriptor::load(path)?,
        None => ClusterDescriptor::load_default()?,
    };

    let client: Arc<dyn dtree_client::MvkvsClient> =
        Arc::new(RpcMvkvsClient::new(TcpTransport, descriptor.clone()));
    let node_cache = Arc::new(NodeCache::new());

    // A dedicated, throwaway tid: the inspector never writes, so there is
    // no worker-affinity or concurrency concern in how it's minted.
    let tid = Tid::new(0, std::process::id(), 1);
    let mut tx = Transaction::start(tid, client, node_cache, descriptor, FeatureFlags::default());

    let root_cid = Cid::new(opt.container_id);
    let object_id = opt.object_id.map(Oid::from);
    let walk_opts = Options {
        check: opt.check,
        raw: opt.raw,
        summary: opt.summary,
    };

    let report = inspect::run(&mut tx, root_cid, object_id, &walk_opts).await?;
    tx.abort().await.ok();

    log::info!("inspected {} node(s)", report.nodes_visited);

    if report.violations > 0 {
        eprintln!("{} invariant violation(s) found", report.violations);
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
