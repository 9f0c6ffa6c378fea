//! Drain pipeline queues.

use clap::Parser;

use scm_models::QueueName;
use scm_queue::{clean_queue, QueueConfig, QueueRegistry};

#[derive(Debug, Parser)]
#[command(name = "clean-queues", about = "Remove pending jobs and purge finished ones")]
struct Args {
    /// Queue to clean; repeat for several. Defaults to all queues
    #[arg(long = "queue", value_name = "NAME")]
    queues: Vec<QueueName>,

    /// Only remove waiting and delayed jobs
    #[arg(long)]
    keep_terminal: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let queues = if args.queues.is_empty() {
        QueueName::ALL.to_vec()
    } else {
        args.queues
    };

    let config = QueueConfig::from_env()?;
    let registry = QueueRegistry::connect(&config).await?;

    for name in queues {
        let report = clean_queue(&registry, name, args.keep_terminal).await?;
        println!(
            "{:<14} drained={} completed={} failed={}",
            name, report.drained, report.completed, report.failed
        );
    }
    Ok(())
}
