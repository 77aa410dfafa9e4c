//! Configuration validation

use super::*;
use anyhow::Result;
use tracing::warn;

/// Largest payload an I/O task may send
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Validate complete configuration
pub fn validate_config(config: &BenchConfig) -> Result<()> {
    validate_workload(&config.workload)?;
    validate_server(&config.server)?;
    validate_output(&config.output)?;
    Ok(())
}

/// Validate workload configuration
pub fn validate_workload(workload: &WorkloadConfig) -> Result<()> {
    if workload.tasks == 0 {
        anyhow::bail!("tasks must be at least 1");
    }

    if workload.concurrency == 0 {
        anyhow::bail!("concurrency must be at least 1");
    }

    // A zero SO_RCVTIMEO means "block forever", which is not what 0 reads as
    if workload.timeout_ms == 0 {
        anyhow::bail!("timeout_ms must be at least 1");
    }

    if workload.payload_size > MAX_PAYLOAD_SIZE {
        anyhow::bail!(
            "payload_size must be <= {} bytes, got {}",
            MAX_PAYLOAD_SIZE,
            workload.payload_size
        );
    }

    if workload.concurrency > workload.tasks {
        warn!(
            "concurrency ({}) exceeds tasks ({}); at most {} task(s) will be in flight",
            workload.concurrency, workload.tasks, workload.tasks
        );
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<()> {
    if server.backlog < 1 {
        anyhow::bail!("backlog must be at least 1, got {}", server.backlog);
    }
    Ok(())
}

fn validate_output(output: &OutputConfig) -> Result<()> {
    if output.models.is_empty() {
        anyhow::bail!("at least one model must be selected");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BenchConfig {
        BenchConfig {
            workload: WorkloadConfig::default(),
            runtime: RuntimeConfig::default(),
            server: ServerConfig::default(),
            output: OutputConfig::default(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&config()).is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = config();
        config.workload.timeout_ms = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut config = config();
        config.workload.payload_size = MAX_PAYLOAD_SIZE + 1;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_payload_allowed() {
        let mut config = config();
        config.workload.payload_size = 0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_backlog_and_models() {
        let mut config = config();
        config.server.backlog = 0;
        assert!(validate_config(&config).is_err());

        let mut config = self::config();
        config.output.models.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_concurrency_above_tasks_is_only_a_warning() {
        let workload = WorkloadConfig {
            tasks: 1,
            concurrency: 100,
            ..Default::default()
        };
        assert!(validate_workload(&workload).is_ok());
    }
}
