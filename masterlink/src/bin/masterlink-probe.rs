//! masterlink-probe: connect to a master as a worker and keep the link alive.
//!
//! Announces itself with `client_ready`, heartbeats on an interval and logs
//! everything the master sends. Ctrl-C (or a `quit` from the master) sends
//! `quit`, waits for the disconnect signal and closes the link.

use std::process;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use masterlink::{ClientConfig, MasterClient, Message, generate_identity, kind};

struct Args {
    host: String,
    port: u16,
    identity: String,
    heartbeat: Duration,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let args = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("Usage: masterlink-probe [--master-host <host>] [--master-port <port>]");
            eprintln!("                        [--identity <id>] [--heartbeat-secs <n>]");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --master-host <host>   Master host [default: 127.0.0.1]");
            eprintln!("  --master-port <port>   Master port [default: 5557]");
            eprintln!("  --identity <id>        Worker identity [default: <hostname>_<uuid>]");
            eprintln!("  --heartbeat-secs <n>   Heartbeat interval in seconds [default: 1]");
            process::exit(2);
        }
    };

    init_tracing();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(args)) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

/// Initialize tracing with MASTERLINK_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("MASTERLINK_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("trace") => "trace",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("masterlink={level},masterlink_probe={level}"))
    };

    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init();
    }
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut host = masterlink::config::DEFAULT_MASTER_HOST.to_string();
    let mut port = masterlink::config::DEFAULT_MASTER_PORT;
    let mut identity: Option<String> = None;
    let mut heartbeat = Duration::from_secs(1);

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--master-host" => {
                i += 1;
                host = args.get(i).ok_or("--master-host requires a value")?.clone();
            }
            "--master-port" => {
                i += 1;
                let raw = args.get(i).ok_or("--master-port requires a value")?;
                port = raw
                    .parse()
                    .map_err(|_| format!("invalid port '{raw}'"))?;
            }
            "--identity" => {
                i += 1;
                identity = Some(args.get(i).ok_or("--identity requires a value")?.clone());
            }
            "--heartbeat-secs" => {
                i += 1;
                let raw = args.get(i).ok_or("--heartbeat-secs requires a value")?;
                let secs: u64 = raw
                    .parse()
                    .map_err(|_| format!("invalid heartbeat interval '{raw}'"))?;
                if secs == 0 {
                    return Err("--heartbeat-secs must be at least 1".to_string());
                }
                heartbeat = Duration::from_secs(secs);
            }
            "--help" | "-h" => return Err(String::new()),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    Ok(Args {
        host,
        port,
        identity: identity.unwrap_or_else(generate_identity),
        heartbeat,
    })
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut client = MasterClient::new(ClientConfig::new(args.host, args.port, args.identity));
    client
        .connect()
        .await
        .context("could not reach master")?;
    tracing::info!(
        endpoint = %client.endpoint(),
        identity = client.identity(),
        "Probe connected, press Ctrl+C to quit"
    );

    let identity = client.identity().to_string();
    let tx = client.send_channel();
    let mut inbound = client
        .recv_channel()
        .context("inbound channel already taken")?;
    let disconnected = client
        .disconnected_channel()
        .context("disconnect channel already taken")?;

    tx.send(Message::client_ready(identity.as_str()))
        .await
        .context("link closed before client_ready")?;

    let mut ticker = tokio::time::interval(args.heartbeat);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, leaving master");
                break;
            }
            msg = inbound.recv() => match msg {
                Some(msg) if msg.msg_type() == kind::QUIT => {
                    tracing::info!("Master asked us to quit");
                    break;
                }
                Some(msg) => {
                    tracing::info!(msg_type = msg.msg_type(), data = %msg.data(), "Message from master");
                }
                None => {
                    tracing::warn!("Link to master lost");
                    client.close().await;
                    return Ok(());
                }
            },
            _ = ticker.tick() => {
                if tx.send(Message::heartbeat(identity.as_str(), "ready", 0.0)).await.is_err() {
                    tracing::warn!("Link closed, stopping heartbeats");
                    break;
                }
            }
        }
    }

    if tx.send(Message::quit(identity.as_str())).await.is_ok()
        && tokio::time::timeout(Duration::from_secs(2), disconnected)
            .await
            .is_err()
    {
        tracing::warn!("Timed out waiting for quit to be sent");
    }
    client.close().await;
    Ok(())
}
