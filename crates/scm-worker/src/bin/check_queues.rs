//! Print the state of every pipeline queue.

use clap::Parser;

use scm_models::{JobState, QueueName};
use scm_queue::{pending_total, queues_health, QueueConfig, QueueRegistry};

#[derive(Debug, Parser)]
#[command(name = "check-queues", about = "Show job counts and recent jobs for each queue")]
struct Args {
    /// Jobs to list per queue for the waiting and failed states
    #[arg(long, default_value_t = 5)]
    sample: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = QueueConfig::from_env()?;
    let registry = QueueRegistry::connect(&config).await?;
    let health = queues_health(&registry).await?;

    for name in QueueName::ALL {
        let counts = health.get(&name).copied().unwrap_or_default();
        println!(
            "{:<14} waiting={} active={} delayed={} completed={} failed={}",
            name, counts.waiting, counts.active, counts.delayed, counts.completed, counts.failed
        );

        if args.sample == 0 {
            continue;
        }
        for state in [JobState::Waiting, JobState::Failed] {
            for job in registry.queue(name).sample(state, args.sample).await? {
                println!(
                    "  [{}] {} attempts={}/{}{}",
                    state,
                    job.id,
                    job.attempts_made,
                    job.max_attempts,
                    job.failed_reason
                        .map(|r| format!(" reason={}", r))
                        .unwrap_or_default()
                );
            }
        }
    }

    println!("pending total: {}", pending_total(&health));
    Ok(())
}
