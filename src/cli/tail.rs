use crate::stream::{RetryPolicy, StreamTarget, TailClient};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct TailArgs {
    pub server: String,
    pub api_key: String,
    pub target: StreamTarget,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

/// Prints a remote log stream to stdout until Ctrl+C.
pub async fn tail(args: TailArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.target.service.is_none() && args.target.file.is_none() {
        return Err("either --service or --file is required".into());
    }

    let policy = RetryPolicy {
        max_attempts: args.max_attempts,
        base_delay: args.retry_delay,
    };
    let client = TailClient::new(&args.server, &args.api_key, &args.target, policy)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, closing stream");
            on_signal.cancel();
        }
    });

    client.run(cancel, |line| println!("{}", line)).await?;
    Ok(())
}
