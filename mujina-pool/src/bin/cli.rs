//! Command-line interface for mujina-pool.
//!
//! This binary provides a CLI for monitoring the pool daemon and feeding it
//! templates via the HTTP API.

use std::env;
use std::io::Read;

use anyhow::Result;

use mujina_pool::api_client;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: mujina-cli <command>");
        eprintln!();
        eprintln!("Commands:");
        eprintln!("  status      Show pool status");
        eprintln!("  jobs        List the active job window");
        eprintln!("  template    Feed a template read from stdin (stream mode)");
        eprintln!();
        eprintln!("Environment:");
        eprintln!("  MUJINA_API_URL    API base URL (default: http://127.0.0.1:7785)");
        std::process::exit(1);
    }

    let command = &args[1];

    match command.as_str() {
        "status" => cmd_status().await?,
        "jobs" => cmd_jobs().await?,
        "template" => cmd_template().await?,
        _ => {
            eprintln!("Unknown command: {}", command);
            eprintln!("Run without arguments to see usage.");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Build an API client, honoring MUJINA_API_URL if set.
fn make_client() -> api_client::Client {
    match env::var("MUJINA_API_URL") {
        Ok(url) => api_client::Client::with_base_url(url),
        Err(_) => api_client::Client::new(),
    }
}

/// Print a summary of the pool state.
async fn cmd_status() -> Result<()> {
    let client = make_client();
    let state = client.get_pool().await?;

    println!("Pool:     {} ({})", state.pool_id, state.symbol);
    println!("Uptime:   {} s", state.uptime_secs);
    match state.height {
        Some(height) => println!("Height:   {}", height),
        None => println!("Height:   (no job yet)"),
    }
    if let Some(difficulty) = state.network_difficulty {
        println!("Network:  {:.4}", difficulty);
    }
    println!("Jobs:     {}/{}", state.active_jobs, state.max_active_jobs);

    Ok(())
}

/// Print the job window, oldest first.
async fn cmd_jobs() -> Result<()> {
    let client = make_client();
    let jobs = client.get_jobs().await?;

    if jobs.is_empty() {
        println!("(no jobs)");
        return Ok(());
    }

    for job in &jobs {
        println!(
            "{:>8}  height {}  txs {}  shares {}  {}",
            job.job_id, job.height, job.transactions, job.submissions, job.created_at
        );
    }

    Ok(())
}

/// Read a template payload from stdin and post it.
async fn cmd_template() -> Result<()> {
    let mut payload = String::new();
    std::io::stdin().read_to_string(&mut payload)?;

    make_client().post_template(payload).await?;
    println!("Template queued.");

    Ok(())
}
