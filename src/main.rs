use distributed_workmanager::dispatcher::http::HttpDispatcher;
use distributed_workmanager::engine::WorkEngine;
use distributed_workmanager::engine::pool::PooledWorkEngine;
use distributed_workmanager::engine::registry::WorkHandlerRegistry;
use distributed_workmanager::group::GroupMembership;
use distributed_workmanager::group::gossip::GossipMembership;
use distributed_workmanager::transport::core::TransportCore;
use distributed_workmanager::transport::types::Address;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const CHANNEL_NAME: &str = "workmanager";

const CAPACITY_REPORT_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 5 {
        eprintln!(
            "Usage: {} --gossip <addr:port> --rpc <addr:port> [--seed <addr:port>] [--short-slots N] [--long-slots N]",
            args[0]
        );
        eprintln!("Example: {} --gossip 127.0.0.1:5000 --rpc 127.0.0.1:6000", args[0]);
        eprintln!(
            "Example: {} --gossip 127.0.0.1:5001 --rpc 127.0.0.1:6001 --seed 127.0.0.1:5000",
            args[0]
        );

        std::process::exit(1);
    }

    let mut gossip_addr: Option<SocketAddr> = None;
    let mut rpc_addr: Option<SocketAddr> = None;
    let mut seed_nodes: Vec<SocketAddr> = vec![];
    let mut short_slots: usize = 8;
    let mut long_slots: usize = 2;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--gossip" => {
                gossip_addr = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--rpc" => {
                rpc_addr = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--seed" => {
                seed_nodes.push(args[i + 1].parse()?);
                i += 2;
            }
            "--short-slots" => {
                short_slots = args[i + 1].parse()?;
                i += 2;
            }
            "--long-slots" => {
                long_slots = args[i + 1].parse()?;
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let gossip_addr = gossip_addr.ok_or_else(|| anyhow::anyhow!("--gossip is required"))?;
    let rpc_addr = rpc_addr.ok_or_else(|| anyhow::anyhow!("--rpc is required"))?;

    tracing::info!("Starting node (gossip {}, rpc {})", gossip_addr, rpc_addr);
    if !seed_nodes.is_empty() {
        tracing::info!("Seed nodes: {:?}", seed_nodes);
    } else {
        tracing::info!("Starting as seed node (founder)");
    }

    // 1. Membership (UDP gossip):
    let membership = GossipMembership::new(gossip_addr, rpc_addr, seed_nodes).await?;
    tracing::info!("Member ID: {:?}", membership.local_member());
    membership.clone().start().await;

    // 2. Command dispatch (HTTP):
    let dispatcher = HttpDispatcher::new(membership.clone(), rpc_addr).await?;

    // 3. Work engine:
    let handlers = WorkHandlerRegistry::new();

    handlers.register("sleep", |work| async move {
        let millis = work.payload["millis"].as_u64().unwrap_or(1000);
        tracing::info!("Executing sleep work for {} ms", millis);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(())
    });

    let engine = PooledWorkEngine::new(handlers, short_slots, long_slots);

    // 4. Transport:
    let group: Arc<dyn GroupMembership> = membership.clone();
    let transport = TransportCore::new(CHANNEL_NAME, group, dispatcher, engine.clone());
    transport.startup().await?;

    let address = Address::new();
    transport.add_work_manager(address.clone()).await?;
    tracing::info!("Local work manager registered as {}", address.0);

    // 5. Periodic capacity reporting:
    let reporter = transport.clone();
    let reporter_engine = engine.clone();
    let reporter_address = address.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CAPACITY_REPORT_INTERVAL);
        let mut last = (i64::MIN, i64::MIN);
        loop {
            interval.tick().await;
            let current = (
                reporter_engine.short_running_free(),
                reporter_engine.long_running_free(),
            );
            if current == last {
                continue;
            }
            last = current;
            if let Err(e) = reporter
                .update_short_running_free(&reporter_address, current.0)
                .await
            {
                tracing::warn!("capacity report failed: {}", e);
            }
            if let Err(e) = reporter
                .update_long_running_free(&reporter_address, current.1)
                .await
            {
                tracing::warn!("capacity report failed: {}", e);
            }
        }
    });

    tracing::info!("Node ready; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    transport.shutdown().await?;

    Ok(())
}
