use anyhow::Result;
use clap::Parser;
use privbill_core::{CycleContext, Data, Vector};
use privbill_network::framing;
use privbill_network::{BillingServer, Envelope, Message, Payload};
use privbill_node::config::{Cli, Command};
use privbill_node::{CoreServer, EdgeServer};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::Core { listen, edge } => {
            let listener = TcpListener::bind(listen).await?;
            let server = CoreServer::new(listen);
            info!(
                id = server.network().id(),
                public_key = hex::encode(server.network().public_key().as_bytes()),
                "core node starting"
            );
            server.join(edge).await?;
            serve(server, listener).await
        }
        Command::Edge {
            listen,
            cycle_length,
        } => {
            let listener = TcpListener::bind(listen).await?;
            let server = EdgeServer::new(listen, cycle_length);
            info!(
                id = server.network().id(),
                public_key = hex::encode(server.network().public_key().as_bytes()),
                cycle_length,
                "edge node starting"
            );
            serve(server, listener).await
        }
        Command::SendContext {
            edge,
            cycle_id,
            cycle_length,
            retail,
            feed_in,
            trading,
        } => {
            let cyc = CycleContext::flat(cycle_id, cycle_length, retail, feed_in, trading);
            inject(edge, Payload::CycleContext(cyc)).await?;
            println!("cycle context {cycle_id} sent to {edge}");
            Ok(())
        }
        Command::SendData {
            core,
            cycle_id,
            promises,
            utilizations,
        } => {
            // the core stamps its own client id on submission
            let data = Data::new(0, cycle_id, Vector::from(promises), Vector::from(utilizations));
            inject(core, Payload::Data(data)).await?;
            println!("data for cycle {cycle_id} sent to {core}");
            Ok(())
        }
        Command::GetBill { core, cycle_id } => {
            let reply = inject(core, Payload::GetBill { cycle_id }).await?;
            match reply.map(|m| m.body) {
                Some(Payload::Bill { bill: Some(bill) }) => {
                    println!("cycle {}: total {:.5}", bill.cycle_id, bill.total());
                    println!("bill:   {:?}", bill.bill.as_slice());
                    println!("reward: {:?}", bill.reward.as_slice());
                }
                _ => println!("no bill for cycle {cycle_id} yet"),
            }
            Ok(())
        }
    }
}

/// Run a role server until ctrl-c.
async fn serve<S: BillingServer>(server: S, listener: TcpListener) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            let _ = shutdown_tx.send(true);
        }
    });
    privbill_network::run(Arc::new(Mutex::new(server)), listener, shutdown_rx).await?;
    Ok(())
}

/// Operator-side injection: a plain, unsigned envelope from outside the
/// overlay. Only unverified message types go this way.
async fn inject(target: SocketAddr, body: Payload) -> Result<Option<Message>> {
    let message = Message {
        reply_address: "0.0.0.0:0".parse()?,
        body,
    };
    let reply = framing::request(target, &Envelope::Plain(message)).await?;
    Ok(match reply {
        None => None,
        Some(Envelope::Plain(message)) => Some(message),
        Some(Envelope::Signed(signed)) => Some(signed.decode()?),
    })
}
