//! Dispatch a command to a fleet of EC2 instances via AWS Systems Manager.
//!
//! The orchestration is a fixed sequence: wait for every targeted instance to
//! report an online SSM agent, submit the command, wait for all per-instance
//! invocations to reach a terminal state, surface persisted output, and
//! re-query the final command record.

use aws_config::BehaviorVersion;
pub use aws_config::Region;
use aws_sdk_ec2::Client as Ec2Client;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_ssm::Client as SsmClient;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};
use thiserror::Error;

mod ec2;
mod output;
mod run;
mod s3;
mod ssm;
mod status;

pub use output::output;
pub use run::{run, run_command};
pub use status::status;

pub const RUN_CMD: &str = "run";
pub const STATUS_CMD: &str = "status";
pub const OUTPUT_CMD: &str = "output";

/// EC2 filter name matching instances by id
const EC2_FILTER_INSTANCE_ID: &str = "instance-id";

/// EC2 filter name matching instances by lifecycle state
const EC2_FILTER_INSTANCE_STATE: &str = "instance-state-name";

/// Lifecycle states an instance may be in before its agent checks in
const TARGETABLE_STATES: [&str; 2] = ["pending", "running"];

/// Reserved target key selecting instances by id
const TARGET_INSTANCE_IDS: &str = "InstanceIds";

/// Total time to wait for target instances to come online (seconds)
const READY_TIMEOUT: u64 = 600;

/// Service-side delivery timeout passed to SendCommand (seconds)
const SEND_TIMEOUT: i32 = 600;

/// Execution timeout used when the configuration does not set one (seconds)
const DEFAULT_EXECUTION_TIMEOUT: u64 = 600;

/// Interval between polling attempts
const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Maximum size of a single logged output chunk (bytes)
const MAX_LOG_CHUNK: usize = 65536;

/// Maximum number of output objects listed per command
const MAX_OUTPUT_KEYS: i32 = 1000;

/// Errors that can occur while orchestrating a command
#[derive(Debug, Error)]
pub enum Error {
    #[error("AWS EC2 error: {0}")]
    AwsEc2(#[from] aws_sdk_ec2::Error),
    #[error("AWS SSM error: {0}")]
    AwsSsm(#[from] aws_sdk_ssm::Error),
    #[error("AWS S3 error: {0}")]
    AwsS3(#[from] aws_sdk_s3::Error),
    #[error("AWS SDK build error: {0}")]
    Build(#[from] aws_sdk_ssm::error::BuildError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("send command returned no command id")]
    MissingCommandId,
    #[error("target instances are not online")]
    InstancesNotOnline,
    #[error("command invocation {status} on {instance} instance")]
    InvocationFailed { status: String, instance: String },
    #[error("command invocations timed out")]
    InvocationTimeout,
}

/// Match criterion selecting target instances by key and values
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TargetConfig {
    pub key: String,
    pub values: Vec<String>,
}

/// Destination bucket (and optional key prefix) for command output
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OutputConfig {
    pub bucket: String,
    pub prefix: Option<String>,
}

/// Describes a single command run against a fleet of target instances
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub region: Option<String>,
    pub document: String,
    #[serde(default)]
    pub parameters: HashMap<String, Vec<String>>,
    pub targets: Vec<TargetConfig>,
    #[serde(default = "default_execution_timeout")]
    pub timeout: u64,
    pub comment: Option<String>,
    pub output: Option<OutputConfig>,
}

fn default_execution_timeout() -> u64 {
    DEFAULT_EXECUTION_TIMEOUT
}

/// AWS service clients shared by every orchestration stage
pub struct Clients {
    pub ec2: Ec2Client,
    pub ssm: SsmClient,
    pub s3: S3Client,
}

impl Clients {
    /// Builds clients from the ambient AWS configuration, optionally pinned
    /// to a region
    pub async fn from_env(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let config = loader.load().await;
        Self {
            ec2: Ec2Client::new(&config),
            ssm: SsmClient::new(&config),
            s3: S3Client::new(&config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parsing() {
        let raw = r#"
document: AWS-RunShellScript
parameters:
  commands:
    - systemctl restart worker
targets:
  - key: tag:fleet
    values: [ingest]
output:
  bucket: fleet-logs
  prefix: runs
"#;
        let config: Config = serde_yaml::from_str(raw).unwrap();
        assert_eq!(config.document, "AWS-RunShellScript");
        assert_eq!(config.timeout, DEFAULT_EXECUTION_TIMEOUT);
        assert!(config.region.is_none());
        assert!(config.comment.is_none());
        assert_eq!(
            config.targets,
            vec![TargetConfig {
                key: "tag:fleet".to_string(),
                values: vec!["ingest".to_string()],
            }]
        );
        assert_eq!(
            config.parameters["commands"],
            vec!["systemctl restart worker".to_string()]
        );
        let output = config.output.unwrap();
        assert_eq!(output.bucket, "fleet-logs");
        assert_eq!(output.prefix.as_deref(), Some("runs"));
    }

    #[test]
    fn test_config_explicit_timeout() {
        let raw = "document: AWS-RunPowerShellScript\ntargets: []\ntimeout: 120\n";
        let config: Config = serde_yaml::from_str(raw).unwrap();
        assert_eq!(config.timeout, 120);
        assert!(config.parameters.is_empty());
        assert!(config.output.is_none());
    }

    #[test]
    fn test_invocation_failed_display() {
        let error = Error::InvocationFailed {
            status: "failed".to_string(),
            instance: "i-0123456789abcdef0".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "command invocation failed on i-0123456789abcdef0 instance"
        );
    }
}
