use clap::Parser;

use wakebench::config::{Cli, Config};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::from_cli(cli).map_err(|e| {
        log::error!("config error: {e}");
        e
    })?;

    let summary = wakebench::run(config).map_err(|e| {
        log::error!("run failed: {e}");
        e
    })?;

    log::debug!(
        "finished: {} loops, {} wakeup samples, {} request samples",
        summary.total_loop_count,
        summary.wakeup_samples,
        summary.request_samples
    );

    Ok(())
}
