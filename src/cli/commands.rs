use std::net::{Ipv4Addr, SocketAddr};

use chrono::Utc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::aggregator::{Aggregator, Query};
use crate::app::{AppContext, Result, RiverbedError};
use crate::daemon::Daemon;
use crate::server::{self, ws, ServerState};

fn ensure_no_daemon(ctx: &AppContext) -> Result<()> {
    let pid_path = Daemon::pid_file_path(&ctx.config.paths.data_folder);
    if Daemon::is_running(&pid_path) {
        return Err(RiverbedError::Other(
            "A riverbed daemon is running on this data folder; use its HTTP endpoints instead"
                .to_string(),
        ));
    }
    Ok(())
}

async fn bind(port: u16) -> Result<TcpListener> {
    Ok(TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await?)
}

/// Run the daemon plus whichever servers are enabled, until a shutdown signal.
pub async fn run(ctx: &AppContext) -> Result<()> {
    let daemon = ctx.daemon();
    let handle = daemon.handle();
    let http = &ctx.config.http;

    let mut servers = Vec::new();
    if http.enabled {
        let listener = bind(http.port).await?;
        let state = ServerState::new(handle.clone(), &ctx.config);
        servers.push(tokio::spawn(async move {
            if let Err(e) = server::serve(listener, state).await {
                error!("HTTP server failed: {}", e);
            }
        }));
    }
    if http.websocket_enabled {
        let listener = bind(http.websocket_port).await?;
        let handle = handle.clone();
        servers.push(tokio::spawn(async move {
            if let Err(e) = ws::serve(listener, handle).await {
                error!("Websocket server failed: {}", e);
            }
        }));
    }

    let result = daemon.run().await;
    for server in servers {
        server.abort();
    }
    result
}

/// Included lists named by the list files, fetched and applied in order.
async fn load_lists(ctx: &AppContext, aggregator: &mut Aggregator) {
    for (listname, url) in aggregator.load_lists(Utc::now()) {
        let result = ctx.fetcher.fetch(&url).await;
        aggregator.apply_included_list(&listname, &url, result);
    }
}

/// Read every subscribed feed once. Returns the number of items added.
pub async fn read_all(ctx: &AppContext) -> Result<usize> {
    ensure_no_daemon(ctx)?;
    let mut aggregator = ctx.aggregator();
    load_lists(ctx, &mut aggregator).await;

    let urls = aggregator.subscribed_urls();
    if urls.is_empty() {
        println!("No feeds to read");
        return Ok(0);
    }
    println!("Reading {} feeds...", urls.len());

    let started = std::time::Instant::now();
    let mut total_new = 0;
    for url in urls {
        let read_at = Utc::now();
        let result = ctx.fetcher.fetch(&url).await;
        let failed = result.is_err();
        let added = aggregator.apply_fetch(&url, read_at, result);
        total_new += added;
        if failed {
            eprintln!("  Error reading {}", url);
        } else if added > 0 {
            println!("  {} new items from {}", added, url);
        }
    }

    let built = aggregator.build_changed_rivers();
    aggregator.shutdown_flush(Utc::now());
    println!(
        "Read complete: {} new items, {} rivers built ({:.1}s)",
        total_new,
        built,
        started.elapsed().as_secs_f64()
    );
    Ok(total_new)
}

pub async fn build_rivers(ctx: &AppContext) -> Result<usize> {
    ensure_no_daemon(ctx)?;
    let mut aggregator = ctx.aggregator();
    load_lists(ctx, &mut aggregator).await;

    let built = aggregator.build_all_rivers().ok_or_else(|| {
        RiverbedError::Config("Can't build the rivers because config.enabled is false.".into())
    })?;
    aggregator.shutdown_flush(Utc::now());
    println!("Built {} rivers", built);
    Ok(built)
}

/// Renew one feed's hub subscription and return the outcome message.
pub async fn renew(ctx: &AppContext, url: &str) -> Result<String> {
    ensure_no_daemon(ctx)?;
    let mut aggregator = ctx.aggregator();

    let message = match aggregator.renew_target(url, Utc::now()) {
        Ok(hub) => {
            info!(feed = url, hub = %hub.endpoint(), "Renewing cloud subscription");
            let result = ctx
                .hub_client
                .please_notify(&hub, url, ctx.config.http.port)
                .await;
            aggregator.apply_renewal(url, &result, Utc::now())
        }
        Err(message) => message,
    };

    aggregator.shutdown_flush(Utc::now());
    println!("{}", message);
    Ok(message)
}

pub fn stats(ctx: &AppContext) -> Result<String> {
    let mut aggregator = ctx.aggregator();
    let json = aggregator
        .query(&Query::Stats, Utc::now())
        .ok_or_else(|| RiverbedError::Other("Failed to serialize stats".into()))?;
    println!("{}", json);
    Ok(json)
}
