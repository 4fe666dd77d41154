#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use measurement_core::config::AgentConfig;
    use measurement_core::{MeasurementError, Probe, Result};

    use crate::executors::{CommandExecutor, ProbeExecutor, ProbeRegistry};

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    struct EchoExecutor;

    #[async_trait]
    impl ProbeExecutor for EchoExecutor {
        async fn execute(&self, arguments: &str) -> Result<String> {
            Ok(format!("echo {arguments}"))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn test_command_executor_passes_split_arguments() {
        let executor = CommandExecutor::new(
            "echo",
            vec!["echo".to_string(), "-n".to_string()],
            Duration::from_secs(5),
        );
        let output = executor.execute("  8.8.8.8   extra ").await.unwrap();
        assert_eq!(output, "8.8.8.8 extra");
    }

    #[tokio::test]
    async fn test_command_executor_merges_stderr() {
        let executor = CommandExecutor::new(
            "mixed",
            sh("echo out; sleep 0.1; echo err 1>&2"),
            Duration::from_secs(5),
        );
        let output = executor.execute("").await.unwrap();
        assert_eq!(output, "out\nerr");
    }

    #[tokio::test]
    async fn test_command_executor_nonzero_exit_keeps_output() {
        let executor = CommandExecutor::new(
            "failing",
            sh("echo unreachable; exit 2"),
            Duration::from_secs(5),
        );
        assert_eq!(executor.execute("").await.unwrap(), "unreachable");
    }

    #[tokio::test]
    async fn test_command_executor_timeout() {
        let executor = CommandExecutor::new(
            "sleep",
            vec!["sleep".to_string()],
            Duration::from_millis(100),
        );
        let err = executor.execute("5").await.unwrap_err();
        assert!(matches!(err, MeasurementError::ProbeExecution(_)));
    }

    #[tokio::test]
    async fn test_command_executor_spawn_failure() {
        let executor = CommandExecutor::new(
            "missing",
            vec!["definitely-not-a-real-binary-xyz".to_string()],
            Duration::from_secs(1),
        );
        assert!(matches!(
            executor.execute("").await,
            Err(MeasurementError::ProbeExecution(_))
        ));
    }

    #[tokio::test]
    async fn test_command_executor_empty_command() {
        let executor = CommandExecutor::new("empty", Vec::new(), Duration::from_secs(1));
        assert!(matches!(
            executor.execute("").await,
            Err(MeasurementError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_registry_unknown_probe_is_noop() {
        let mut registry = ProbeRegistry::new();
        registry.register(Probe::Ping, Arc::new(EchoExecutor));

        assert_eq!(registry.run(Probe::Ping, "host").await.unwrap(), "echo host");
        assert_eq!(registry.run(Probe::Unknown, "host").await.unwrap(), "");
        assert_eq!(registry.run(Probe::Curl, "host").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_registry_from_config_validates_httpstat() {
        let registry = ProbeRegistry::from_config(&AgentConfig::default());
        assert!(matches!(
            registry.run(Probe::Httpstat, "ftp://x").await,
            Err(MeasurementError::Validation(_))
        ));
    }
}
