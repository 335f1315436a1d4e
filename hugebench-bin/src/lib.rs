//! # Hugebench binary support
//!
//! Shared setup for the `hugebench` binary.
//!
//! ## External Crates
//!
//! - `log` / `env_logger`: Logging, filtered through `RUST_LOG` (default `info`).

/// Installs the global logger with `info` as default filter.
pub fn init_logging() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init()?;
    Ok(())
}
