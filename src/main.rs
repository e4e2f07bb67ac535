use anyhow::{Context, anyhow};
use quorum_kv::cluster::types::NodeAddress;
use quorum_kv::config::ServiceConfig;
use quorum_kv::server::node::Server;
use quorum_kv::storage::engine::MemoryStore;
use std::net::SocketAddr;
use std::sync::Arc;

fn usage(program: &str) -> ! {
    eprintln!(
        "Usage: {} --bind <addr:port> --self <url> --node <url> [--node <url> ...] \
         [--max-fails <n>] [--workers <n>] [--queue <n>]",
        program
    );
    eprintln!(
        "Example: {} --bind 127.0.0.1:8080 --self http://127.0.0.1:8080 \
         --node http://127.0.0.1:8080 --node http://127.0.0.1:8081",
        program
    );
    std::process::exit(1);
}

fn flag_value<'a>(args: &'a [String], i: usize) -> anyhow::Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{} requires a value", args[i]))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        usage(&args[0]);
    }

    let mut bind_addr: Option<SocketAddr> = None;
    let mut self_url: Option<NodeAddress> = None;
    let mut nodes: Vec<NodeAddress> = vec![];
    let mut max_fails: Option<u32> = None;
    let mut workers: Option<usize> = None;
    let mut queue: Option<usize> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => bind_addr = Some(flag_value(&args, i)?.parse()?),
            "--self" => self_url = Some(NodeAddress::from(flag_value(&args, i)?)),
            "--node" => nodes.push(NodeAddress::from(flag_value(&args, i)?)),
            "--max-fails" => max_fails = Some(flag_value(&args, i)?.parse()?),
            "--workers" => workers = Some(flag_value(&args, i)?.parse()?),
            "--queue" => queue = Some(flag_value(&args, i)?.parse()?),
            other => {
                tracing::warn!("Ignoring unknown argument {}", other);
                i += 1;
                continue;
            }
        }
        i += 2;
    }

    let bind_addr = bind_addr.context("--bind is required")?;
    let self_url = self_url.context("--self is required")?;
    if nodes.is_empty() {
        nodes.push(self_url.clone());
    }

    let mut config = ServiceConfig::new(bind_addr, self_url, nodes);
    if let Some(max_fails) = max_fails {
        config.max_fails = max_fails;
    }
    if let Some(workers) = workers {
        config.dispatcher.max_workers = workers;
        config.dispatcher.core_workers = config.dispatcher.core_workers.min(workers);
    }
    if let Some(queue) = queue {
        config.dispatcher.queue_capacity = queue;
    }

    tracing::info!("Cluster members: {:?}", config.cluster_urls);

    let server = Server::start(config, Arc::new(MemoryStore::new())).await?;
    tracing::info!("Press Ctrl+C to shutdown");

    tokio::signal::ctrl_c().await?;
    server.stop().await;

    Ok(())
}
