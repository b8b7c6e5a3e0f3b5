//! Runs a small workload with a BLAS library capped at a given thread count.
//!
//! ```bash
//! cargo run -p blasctl --example limit_scope -- /usr/lib/x86_64-linux-gnu/libopenblas.so.0 4
//! RUST_LOG=blasctl=debug cargo run -p blasctl --example limit_scope
//! ```
//!
//! Without a library path the targets come from `blasctl.toml` (see
//! `blasctl::Config`).

use anyhow::{Context, Result, bail};
use blasctl::{Config, LibraryInfo, LibraryTarget, ThreadpoolController};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_info(label: &str, info: &[LibraryInfo]) -> Result<()> {
    println!("{label}: {}", serde_json::to_string_pretty(info)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().context("failed to parse log directive")?),
        )
        .init();

    // SAFETY: first thing after logging setup; no other threads exist yet.
    unsafe {
        blasctl::env::allow_duplicate_openmp_runtime();
    }

    let mut args = std::env::args().skip(1);
    let targets = match args.next() {
        Some(path) => vec![LibraryTarget::openblas(path)],
        None => match Config::resolve().context("failed to resolve blasctl.toml")? {
            Some(config) => config.libraries,
            None => bail!("pass a library path or create a blasctl.toml"),
        },
    };
    let limit: u32 = match args.next() {
        Some(raw) => raw.parse().context("thread limit must be a positive integer")?,
        None => 1,
    };

    let controller =
        ThreadpoolController::load(&targets).context("failed to load native libraries")?;
    print_info("before", &controller.info())?;

    let checksum = controller.with_limit(limit, |limiter| -> Result<u64> {
        print_info("inside", &limiter.controller().info())?;
        info!(limit, "Running workload");
        Ok((1..=1_000_000u64).map(|i| i % 7).sum())
    })?;

    info!(checksum, "Workload finished");

    let after = ThreadpoolController::load(&targets).context("failed to reload libraries")?;
    print_info("after", &after.info())?;
    Ok(())
}
