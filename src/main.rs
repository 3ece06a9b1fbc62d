use anyhow::{Context as _, Result};
use std::{io::BufRead as _, sync::Arc};

use clap::Parser;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use machinehub::{
    cache::MemoryCache,
    config::{Cli, Command, Config, HashTokenArgs, ProvisionArgs},
    device::HttpDeviceGateway,
    identity::{HashedTokenIdentity, TokenHash},
    state::{JsonSnapshotStore, StoreInit},
    store::LocalMachineStore,
    workflow::ReservationWorkflow,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let cmd = cli.command.clone().unwrap_or(Command::Run);

    match cmd {
        Command::Run => run_server(cli.config).await,
        Command::Provision(args) => provision_machine(&cli.config, args),
        Command::HashToken(args) => hash_token(args),
    }
}

fn provision_machine(config: &Config, args: ProvisionArgs) -> Result<()> {
    let store = JsonSnapshotStore::load_or_init(StoreInit {
        data_dir: config.data_dir.clone(),
    })?;
    let machine = store.provision_machine(args.machine_id, args.location_id)?;
    info!(
        machine_id = %machine.machine_id,
        location_id = %machine.location_id,
        data_dir = %config.data_dir.display(),
        "machine provisioned"
    );
    println!("{}", serde_json::to_string_pretty(&machine)?);
    Ok(())
}

fn hash_token(args: HashTokenArgs) -> Result<()> {
    let token = match (args.token, args.token_stdin) {
        (Some(token), _) => token,
        (None, true) => {
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
        (None, false) => anyhow::bail!("either --token or --token-stdin is required"),
    };

    let hash = TokenHash::generate(&token).context("hash token")?;
    println!("{}", hash.as_str());
    Ok(())
}

async fn run_server(config: Config) -> Result<()> {
    let snapshot = JsonSnapshotStore::load_or_init(StoreInit {
        data_dir: config.data_dir.clone(),
    })?;
    let machine_count = snapshot.load()?.machines.len();

    let api_token_hash = config.api_token_hash();
    if api_token_hash.is_none() {
        warn!("no valid --api-token-hash configured; every request will be rejected");
    }

    let workflow = ReservationWorkflow::new(
        Arc::new(LocalMachineStore::new(snapshot)),
        Arc::new(MemoryCache::new()),
        Arc::new(HttpDeviceGateway::from_config(&config)?),
    );
    let identity = Arc::new(HashedTokenIdentity::new(api_token_hash));

    let app = machinehub::http::build_router(workflow, identity)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    info!(
        bind = %config.bind,
        data_dir = %config.data_dir.display(),
        device_api = %config.device_api_base_url,
        machines = machine_count,
        version = machinehub::version::VERSION,
        "starting machinehub"
    );
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).compact().init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
