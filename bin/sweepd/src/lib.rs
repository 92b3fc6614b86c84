pub mod rbf_server;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bitcoincore_rpc_async::Auth;
use clap::Parser;
use eyre::Result;
use sweep_sdk::broadcaster::{BroadcastScheduler, DeletionPolicy};
use sweep_sdk::engine::FeeBumpEngine;
use sweep_sdk::events::{BridgeEventAction, BridgeEventListener};
use sweep_sdk::monitor::ConfirmationMonitor;
use sweep_sdk::oracle::{CoreRpcOracle, NodeOracle};
use sweep_sdk::queue::SweepQueue;
use sweep_sdk::rbf::RbfHandler;
use sweep_sdk::{handle_background_thread_result, DatabaseLocation};
use tokio::task::JoinSet;
use tracing::info;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct SweepdArgs {
    /// Bitcoin Core RPC URL (http://host:port)
    #[arg(long, env)]
    pub btc_rpc: String,

    /// Name of the loaded Core wallet funding fee inputs and replacements
    #[arg(long, env)]
    pub btc_wallet: String,

    /// Bitcoin Core RPC username, omit for cookie-less local nodes
    #[arg(long, env)]
    pub btc_rpc_user: Option<String>,

    /// Bitcoin Core RPC password
    #[arg(long, env)]
    pub btc_rpc_pass: Option<String>,

    /// Bridge chain REST API base URL
    #[arg(long, env)]
    pub bridge_api_url: String,

    /// Bridge chain tendermint websocket URL
    #[arg(long, env)]
    pub bridge_ws_url: String,

    /// Database location for the sweep queue, one of "memory" or a path to a directory
    #[arg(long, env)]
    pub database_location: DatabaseLocation,

    /// Listen address for the replacement endpoint
    #[arg(long, env, default_value = "0.0.0.0:8080")]
    pub rbf_listen_addr: String,

    /// Seconds between broadcast scheduler polls of the chain tip
    #[arg(long, env, default_value = "60")]
    pub broadcast_poll_interval_secs: u64,

    /// Seconds between confirmation monitor polls
    #[arg(long, env, default_value = "60")]
    pub monitor_poll_interval_secs: u64,

    /// Delete queue entries after the first successful broadcast instead
    /// of waiting for confirmation
    #[arg(long, env, default_value = "false")]
    pub delete_after_broadcast: bool,
}

/// Credentials come as a pair or not at all; half a pair is a config
/// mistake, not anonymous access.
fn rpc_auth(user: Option<String>, pass: Option<String>) -> Result<Auth> {
    match (user, pass) {
        (Some(user), Some(pass)) => Ok(Auth::UserPass(user, pass)),
        (None, None) => Ok(Auth::None),
        (Some(_), None) => Err(eyre::eyre!("--btc-rpc-user provided without --btc-rpc-pass")),
        (None, Some(_)) => Err(eyre::eyre!("--btc-rpc-pass provided without --btc-rpc-user")),
    }
}

pub async fn run(args: SweepdArgs) -> Result<()> {
    let auth = rpc_auth(args.btc_rpc_user.clone(), args.btc_rpc_pass.clone())?;
    let wallet_url = format!(
        "{}/wallet/{}",
        args.btc_rpc.trim_end_matches('/'),
        args.btc_wallet
    );
    let oracle: Arc<dyn NodeOracle> = Arc::new(CoreRpcOracle::new(wallet_url, auth).await?);

    let conn = match &args.database_location {
        DatabaseLocation::InMemory => tokio_rusqlite::Connection::open_in_memory().await?,
        DatabaseLocation::Directory(path) => {
            tokio::fs::create_dir_all(path).await?;
            tokio_rusqlite::Connection::open(std::path::Path::new(path).join("sweeps.db")).await?
        }
    };
    let queue = SweepQueue::new(conn);
    queue.setup().await?;
    info!(database_location = ?args.database_location, "sweep queue ready");

    let mut join_set: JoinSet<eyre::Result<()>> = JoinSet::new();

    let engine = FeeBumpEngine::new(oracle.clone(), queue.clone());
    BridgeEventListener::new(
        args.bridge_ws_url.clone(),
        args.bridge_api_url.clone(),
        BridgeEventAction::BroadcastSweep,
        engine,
    )
    .spawn(&mut join_set);

    let deletion_policy = if args.delete_after_broadcast {
        DeletionPolicy::OnSubmit
    } else {
        DeletionPolicy::OnConfirm
    };
    BroadcastScheduler::new(
        oracle.clone(),
        queue.clone(),
        Duration::from_secs(args.broadcast_poll_interval_secs),
        deletion_policy,
    )
    .spawn(&mut join_set);

    ConfirmationMonitor::new(
        oracle.clone(),
        queue.clone(),
        Duration::from_secs(args.monitor_poll_interval_secs),
    )
    .spawn(&mut join_set);

    let listen_addr: SocketAddr = args.rbf_listen_addr.parse()?;
    rbf_server::spawn(listen_addr, RbfHandler::new(oracle.clone()), &mut join_set);

    // Crash the process if any background task exits; a supervisor restart
    // resumes cleanly from the durable queue.
    handle_background_thread_result(join_set.join_next().await)
}
