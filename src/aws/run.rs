//! `run` subcommand: readiness gating, dispatch, and completion tracking

use crate::aws::{
    ec2, output::collect_command_output, ssm, Clients, Config, Error, TargetConfig,
    EC2_FILTER_INSTANCE_ID, EC2_FILTER_INSTANCE_STATE, POLL_INTERVAL, READY_TIMEOUT,
    TARGETABLE_STATES, TARGET_INSTANCE_IDS,
};
use aws_sdk_ec2::types::{Filter, Reservation};
use aws_sdk_ssm::{
    types::{
        Command, CommandInvocation, CommandInvocationStatus, InstanceInformation,
        InstanceInformationStringFilter, PingStatus, Target,
    },
    Client as SsmClient,
};
use std::{fs::File, path::PathBuf};
use tokio::time::sleep;
use tracing::{error, info};

/// Runs the command described by the YAML configuration file
pub async fn run(config_path: &PathBuf) -> Result<(), Error> {
    // Load configuration
    let config: Config = {
        let config_file = File::open(config_path)?;
        serde_yaml::from_reader(config_file)?
    };
    info!(
        document = config.document.as_str(),
        targets = config.targets.len(),
        "loaded configuration"
    );

    // Dispatch and wait for completion
    let clients = Clients::from_env(config.region.clone()).await;
    let command = run_command(&clients, &config).await?;
    info!(
        command_id = command.command_id().unwrap_or_default(),
        status = command.status().map(|s| s.as_str()).unwrap_or_default(),
        "command finished"
    );
    Ok(())
}

/// Dispatches a command to the targeted fleet and waits for it to complete.
///
/// Waits for every targeted instance to report an online agent, submits the
/// command, waits for all per-instance invocations to reach a terminal state,
/// surfaces any persisted output, and returns the final command record (an
/// empty record if the service no longer knows the id).
pub async fn run_command(clients: &Clients, config: &Config) -> Result<Command, Error> {
    let (ec2_filters, ssm_filters) = build_filters(&config.targets)?;
    wait_for_target_instances(clients, ec2_filters, ssm_filters, READY_TIMEOUT).await?;

    let targets = build_targets(&config.targets);
    let command_id = ssm::send_command(&clients.ssm, config, targets).await?;
    info!(command_id = command_id.as_str(), "sent command");

    let result = wait_for_command_invocations(&clients.ssm, &command_id, config.timeout).await;

    // Surface whatever output exists even when the wait failed. Collection
    // errors never override the wait result.
    match config.output.as_ref().filter(|o| !o.bucket.is_empty()) {
        Some(output) => {
            if let Err(error) = collect_command_output(&clients.s3, &command_id, output).await {
                error!(error = %error, "failed to collect command output");
            }
        }
        None => info!("no output bucket configured, skipping output collection"),
    }
    result?;

    ssm::get_command(&clients.ssm, &command_id).await
}

/// Number of polling attempts available within a timeout
fn attempts(timeout: u64) -> u64 {
    timeout / POLL_INTERVAL.as_secs()
}

/// Translates target criteria into EC2 and SSM inventory filters.
///
/// The reserved `InstanceIds` key maps to the EC2 `instance-id` filter name;
/// all other keys pass through unchanged. An instance state filter is
/// appended so the compute inventory only counts instances that could still
/// come online.
fn build_filters(
    targets: &[TargetConfig],
) -> Result<(Vec<Filter>, Vec<InstanceInformationStringFilter>), Error> {
    let mut ec2_filters = Vec::with_capacity(targets.len() + 1);
    let mut ssm_filters = Vec::with_capacity(targets.len());
    for target in targets {
        let name = if target.key.eq_ignore_ascii_case(TARGET_INSTANCE_IDS) {
            EC2_FILTER_INSTANCE_ID
        } else {
            target.key.as_str()
        };
        ec2_filters.push(
            Filter::builder()
                .name(name)
                .set_values(Some(target.values.clone()))
                .build(),
        );
        ssm_filters.push(
            InstanceInformationStringFilter::builder()
                .key(&target.key)
                .set_values(Some(target.values.clone()))
                .build()?,
        );
    }
    ec2_filters.push(
        Filter::builder()
            .name(EC2_FILTER_INSTANCE_STATE)
            .set_values(Some(
                TARGETABLE_STATES.iter().map(|s| s.to_string()).collect(),
            ))
            .build(),
    );
    Ok((ec2_filters, ssm_filters))
}

/// Converts target criteria into SendCommand targets
fn build_targets(targets: &[TargetConfig]) -> Vec<Target> {
    targets
        .iter()
        .map(|target| {
            Target::builder()
                .key(&target.key)
                .set_values(Some(target.values.clone()))
                .build()
        })
        .collect()
}

/// Observed counts from one readiness poll of both inventories
struct FleetStatus {
    instances: usize,
    agents: usize,
    online: usize,
}

impl FleetStatus {
    fn new(reservations: &[Reservation], agents: &[InstanceInformation]) -> Self {
        Self {
            instances: reservations.iter().map(|r| r.instances().len()).sum(),
            agents: agents.len(),
            online: agents
                .iter()
                .filter(|agent| agent.ping_status() == Some(&PingStatus::Online))
                .count(),
        }
    }

    /// Ready once at least one agent has registered and every instance is
    /// online. An empty agent inventory means the fleet has not checked in
    /// yet, not that something failed.
    fn is_ready(&self) -> bool {
        self.agents > 0 && self.online == self.instances
    }
}

/// Waits until every targeted instance reports an online SSM agent
async fn wait_for_target_instances(
    clients: &Clients,
    ec2_filters: Vec<Filter>,
    ssm_filters: Vec<InstanceInformationStringFilter>,
    timeout: u64,
) -> Result<(), Error> {
    for _ in 0..attempts(timeout) {
        let reservations = ec2::describe_instances(&clients.ec2, ec2_filters.clone()).await?;
        let agents =
            ssm::describe_instance_information(&clients.ssm, ssm_filters.clone()).await?;
        let status = FleetStatus::new(&reservations, &agents);
        info!(
            online = status.online,
            total = status.instances,
            "target instances online"
        );
        if status.is_ready() {
            return Ok(());
        }
        sleep(POLL_INTERVAL).await;
    }
    error!("target instances are not online");
    Err(Error::InstancesNotOnline)
}

/// Waits for every invocation of a command to reach a terminal state
async fn wait_for_command_invocations(
    client: &SsmClient,
    command_id: &str,
    timeout: u64,
) -> Result<(), Error> {
    for _ in 0..attempts(timeout) {
        let invocations = ssm::list_command_invocations(client, command_id).await?;
        if invocations.is_empty() {
            // Invocations may not be visible immediately after dispatch.
            sleep(POLL_INTERVAL).await;
            continue;
        }
        match pending_invocations(&invocations) {
            Ok(0) => return Ok(()),
            Ok(pending) => info!(command_id, pending, "waiting for command invocations"),
            Err(error) => {
                error!(command_id, error = %error, "command invocation failed");
                return Err(error);
            }
        }
        sleep(POLL_INTERVAL).await;
    }
    error!(command_id, "command invocations timed out");
    Err(Error::InvocationTimeout)
}

/// Counts invocations still pending, failing fast on any terminal failure
fn pending_invocations(invocations: &[CommandInvocation]) -> Result<usize, Error> {
    let mut pending = 0;
    for invocation in invocations {
        let Some(status) = invocation.status() else {
            continue;
        };
        match status {
            CommandInvocationStatus::Pending | CommandInvocationStatus::InProgress => pending += 1,
            CommandInvocationStatus::Cancelled
            | CommandInvocationStatus::TimedOut
            | CommandInvocationStatus::Failed => {
                return Err(Error::InvocationFailed {
                    status: status.as_str().to_lowercase(),
                    instance: invocation.instance_id().unwrap_or_default().to_string(),
                });
            }
            _ => {}
        }
    }
    Ok(pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::types::Instance;

    fn reservation(count: usize) -> Reservation {
        let mut builder = Reservation::builder();
        for _ in 0..count {
            builder = builder.instances(Instance::builder().build());
        }
        builder.build()
    }

    fn agent(status: PingStatus) -> InstanceInformation {
        InstanceInformation::builder().ping_status(status).build()
    }

    fn invocation(status: CommandInvocationStatus, instance: &str) -> CommandInvocation {
        CommandInvocation::builder()
            .status(status)
            .instance_id(instance)
            .build()
    }

    fn target(key: &str, values: &[&str]) -> TargetConfig {
        TargetConfig {
            key: key.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn test_build_filters_instance_ids() {
        let targets = vec![target("InstanceIds", &["i-1", "i-2"])];
        let (ec2_filters, ssm_filters) = build_filters(&targets).unwrap();

        assert_eq!(ec2_filters.len(), 2);
        assert_eq!(ec2_filters[0].name(), Some("instance-id"));
        assert_eq!(ec2_filters[0].values(), ["i-1", "i-2"]);
        assert_eq!(ec2_filters[1].name(), Some("instance-state-name"));
        assert_eq!(ec2_filters[1].values(), ["pending", "running"]);

        assert_eq!(ssm_filters.len(), 1);
        assert_eq!(ssm_filters[0].key(), "InstanceIds");
        assert_eq!(ssm_filters[0].values(), ["i-1", "i-2"]);
    }

    #[test]
    fn test_build_filters_passthrough() {
        let targets = vec![
            target("tag:fleet", &["ingest"]),
            target("instanceids", &["i-3"]),
        ];
        let (ec2_filters, ssm_filters) = build_filters(&targets).unwrap();

        assert_eq!(ec2_filters[0].name(), Some("tag:fleet"));
        // Reserved key matches case-insensitively.
        assert_eq!(ec2_filters[1].name(), Some("instance-id"));
        assert_eq!(ssm_filters[1].key(), "instanceids");
        assert_eq!(ec2_filters[2].name(), Some("instance-state-name"));
    }

    #[test]
    fn test_build_filters_empty() {
        let (ec2_filters, ssm_filters) = build_filters(&[]).unwrap();
        assert_eq!(ec2_filters.len(), 1);
        assert_eq!(ec2_filters[0].name(), Some("instance-state-name"));
        assert!(ssm_filters.is_empty());
    }

    #[test]
    fn test_build_targets() {
        let targets = build_targets(&[target("InstanceIds", &["i-1"])]);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].key(), Some("InstanceIds"));
        assert_eq!(targets[0].values(), ["i-1"]);
    }

    #[test]
    fn test_fleet_status_ready() {
        let reservations = vec![reservation(2)];
        let agents = vec![agent(PingStatus::Online), agent(PingStatus::Online)];
        let status = FleetStatus::new(&reservations, &agents);
        assert_eq!(status.online, 2);
        assert_eq!(status.instances, 2);
        assert!(status.is_ready());
    }

    #[test]
    fn test_fleet_status_partial() {
        let reservations = vec![reservation(1), reservation(1)];
        let agents = vec![agent(PingStatus::Online), agent(PingStatus::ConnectionLost)];
        let status = FleetStatus::new(&reservations, &agents);
        assert_eq!(status.online, 1);
        assert_eq!(status.instances, 2);
        assert!(!status.is_ready());
    }

    #[test]
    fn test_fleet_status_no_agents() {
        // Instances that have not yet registered with the agent service are
        // not-ready, not an error.
        let status = FleetStatus::new(&[reservation(2)], &[]);
        assert_eq!(status.instances, 2);
        assert_eq!(status.online, 0);
        assert!(!status.is_ready());

        // Even a zero-instance fleet is not ready until an agent checks in.
        let status = FleetStatus::new(&[], &[]);
        assert!(!status.is_ready());
    }

    #[test]
    fn test_pending_invocations_counts() {
        let invocations = vec![
            invocation(CommandInvocationStatus::Pending, "i-1"),
            invocation(CommandInvocationStatus::InProgress, "i-2"),
            invocation(CommandInvocationStatus::Success, "i-3"),
        ];
        assert_eq!(pending_invocations(&invocations).unwrap(), 2);
    }

    #[test]
    fn test_pending_invocations_complete() {
        let invocations = vec![
            invocation(CommandInvocationStatus::Success, "i-1"),
            invocation(CommandInvocationStatus::Success, "i-2"),
        ];
        assert_eq!(pending_invocations(&invocations).unwrap(), 0);
    }

    #[test]
    fn test_pending_invocations_terminal_failure() {
        let invocations = vec![
            invocation(CommandInvocationStatus::Pending, "i-1"),
            invocation(CommandInvocationStatus::TimedOut, "i-2"),
        ];
        let error = pending_invocations(&invocations).unwrap_err();
        assert_eq!(
            error.to_string(),
            "command invocation timedout on i-2 instance"
        );
    }

    #[test]
    fn test_pending_invocations_failure_beats_pending() {
        // A single terminal failure fails the wait even while other
        // invocations are still running.
        let invocations = vec![
            invocation(CommandInvocationStatus::InProgress, "i-1"),
            invocation(CommandInvocationStatus::Failed, "i-2"),
            invocation(CommandInvocationStatus::Pending, "i-3"),
        ];
        assert!(matches!(
            pending_invocations(&invocations).unwrap_err(),
            Error::InvocationFailed { ref status, ref instance }
                if status == "failed" && instance == "i-2"
        ));
    }

    #[test]
    fn test_pending_invocations_cancelling_not_pending() {
        let invocations = vec![invocation(CommandInvocationStatus::Cancelling, "i-1")];
        assert_eq!(pending_invocations(&invocations).unwrap(), 0);
    }

    #[test]
    fn test_attempts() {
        assert_eq!(attempts(600), 60);
        assert_eq!(attempts(15), 1);
        assert_eq!(attempts(5), 0);
    }
}
