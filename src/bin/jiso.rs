//! `jiso` binary (§6): parses the CLI surface, starts the engine, and
//! drives a line-oriented scripted session over stdin.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use jiso::{Cli, Engine};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("jiso: {e}");
            return ExitCode::FAILURE;
        }
    };

    let engine = match Engine::start(config).await {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("jiso: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = run_session(&engine).await;
    engine.shutdown().await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("jiso: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Read commands from stdin until EOF or `quit`:
///
/// ```text
/// send <tx>
/// background <tx> <count> <interval_ms>
/// stress <tx> <target_tps> <rampup_s> <duration_s> <workers>
/// stop <worker_id>
/// stats
/// quit
/// ```
async fn run_session(engine: &Engine) -> jiso::Result<()> {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.map_err(jiso::Error::Io)? {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => continue,
            ["quit"] => break,
            ["send", tx] => match engine.send(tx).await {
                Ok(reply) => println!("ok mti={} response_code={:?}", reply.mti, reply.get_str(39)),
                Err(e) => println!("error {e}"),
            },
            ["background", tx, count, interval_ms] => {
                let count: u32 = count.parse().unwrap_or(1);
                let interval = Duration::from_millis(interval_ms.parse().unwrap_or(1000));
                let id = engine.start_background_worker(tx, count, interval).await;
                println!("started {id}");
            }
            ["stress", tx, target_tps, rampup_s, duration_s, workers] => {
                let target_tps: u32 = target_tps.parse().unwrap_or(1);
                let ramp = Duration::from_secs(rampup_s.parse().unwrap_or(0));
                let duration = Duration::from_secs(duration_s.parse().unwrap_or(0));
                let workers: u32 = workers.parse().unwrap_or(1);
                let id = engine.start_stress_test_worker(tx, target_tps, ramp, duration, workers).await;
                println!("started {id}");
            }
            ["stop", id] => match engine.stop_worker(id).await {
                Ok(()) => println!("stopped {id}"),
                Err(e) => println!("error {e}"),
            },
            ["stats"] => {
                let tx_stats = engine.transaction_stats();
                println!(
                    "transactions: count={} mean_ms={:.2} stddev_ms={:.2}",
                    tx_stats.count(),
                    tx_stats.mean_ms(),
                    tx_stats.standard_deviation_ms(),
                );
                let net_stats = engine.networking_stats();
                println!(
                    "networking: reconnects={} failures={} circuit_trips={} connected={}",
                    net_stats.reconnect_successes(),
                    net_stats.reconnect_failures(),
                    net_stats.circuit_breaker_trips(),
                    engine.is_connected().await,
                );
                for worker in engine.worker_stats().await {
                    println!("worker {} ({}): ok={} failed={}", worker.id, worker.name, worker.successful, worker.failed);
                }
            }
            _ => println!("error unrecognized command: {line}"),
        }
    }
    Ok(())
}
