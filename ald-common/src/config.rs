//! Runtime configuration, loaded once at startup (spec.md §6).
//!
//! Grounded on `ob-poc-web`'s pattern of reading `DATABASE_URL` from the
//! environment and failing fast before any task is spawned; generalized
//! here into a single typed struct so every component reads from one
//! place instead of calling `std::env::var` scattered through the tree.

use std::time::Duration;

use crate::error::AldError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlcMode {
    Simulation,
    Real,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub machine_id: String,
    pub database_url: String,
    pub plc_mode: PlcMode,
    pub plc_host: String,
    pub plc_port: u16,
    pub sample_interval: Duration,
    pub command_poll_interval: Duration,
    pub write_batch_size: usize,
    pub http_port: u16,
}

impl RuntimeConfig {
    /// Read and validate configuration from the process environment.
    /// Fails fast with `AldError::Config` before any component is started
    /// (spec.md §6: "the process must not partially start").
    pub fn from_env() -> Result<Self, AldError> {
        let machine_id = required_env("MACHINE_ID")?;
        let database_url = required_env("DATABASE_URL")?;

        let plc_mode = match std::env::var("PLC_MODE").unwrap_or_else(|_| "simulation".into()).as_str() {
            "simulation" => PlcMode::Simulation,
            "real" => PlcMode::Real,
            other => {
                return Err(AldError::Config(format!(
                    "PLC_MODE must be 'simulation' or 'real', got '{other}'"
                )))
            }
        };

        let plc_host = std::env::var("PLC_HOST").unwrap_or_else(|_| "127.0.0.1".into());
        let plc_port = parse_env_or("PLC_PORT", 502)?;
        let sample_interval_ms = parse_env_or("SAMPLE_INTERVAL_MS", 1000)?;
        let command_poll_interval_ms = parse_env_or("COMMAND_POLL_INTERVAL_MS", 5000)?;
        let write_batch_size = parse_env_or("WRITE_BATCH_SIZE", 50usize)?;
        let http_port = parse_env_or("HTTP_PORT", 8080)?;

        if plc_mode == PlcMode::Real && plc_host.is_empty() {
            return Err(AldError::Config(
                "PLC_HOST must be set when PLC_MODE=real".into(),
            ));
        }

        Ok(Self {
            machine_id,
            database_url,
            plc_mode,
            plc_host,
            plc_port,
            sample_interval: Duration::from_millis(sample_interval_ms),
            command_poll_interval: Duration::from_millis(command_poll_interval_ms),
            write_batch_size,
            http_port,
        })
    }
}

fn required_env(key: &str) -> Result<String, AldError> {
    std::env::var(key).map_err(|_| AldError::Config(format!("missing required env var {key}")))
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T, AldError>
where
    T: std::str::FromStr,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AldError::Config(format!("invalid value for {key}: '{raw}'"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment-variable tests must not run concurrently with each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "MACHINE_ID",
            "DATABASE_URL",
            "PLC_MODE",
            "PLC_HOST",
            "PLC_PORT",
            "SAMPLE_INTERVAL_MS",
            "COMMAND_POLL_INTERVAL_MS",
            "WRITE_BATCH_SIZE",
            "HTTP_PORT",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn missing_required_var_fails_fast() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let err = RuntimeConfig::from_env().unwrap_err();
        assert!(matches!(err, AldError::Config(_)));
    }

    #[test]
    fn defaults_apply_when_optional_vars_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("MACHINE_ID", "ald-01");
        std::env::set_var("DATABASE_URL", "postgres://localhost/ald");
        let cfg = RuntimeConfig::from_env().unwrap();
        assert_eq!(cfg.plc_mode, PlcMode::Simulation);
        assert_eq!(cfg.plc_port, 502);
        assert_eq!(cfg.sample_interval, Duration::from_millis(1000));
        clear_env();
    }

    #[test]
    fn real_mode_requires_host() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("MACHINE_ID", "ald-01");
        std::env::set_var("DATABASE_URL", "postgres://localhost/ald");
        std::env::set_var("PLC_MODE", "real");
        std::env::set_var("PLC_HOST", "");
        let err = RuntimeConfig::from_env().unwrap_err();
        assert!(matches!(err, AldError::Config(_)));
        clear_env();
    }
}
