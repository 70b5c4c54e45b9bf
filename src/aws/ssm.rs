//! AWS SSM SDK wrappers for agent inventory and command execution

use crate::aws::{Config, Error, SEND_TIMEOUT};
use aws_sdk_ssm::{
    types::{
        Command, CommandInvocation, InstanceInformation, InstanceInformationStringFilter, Target,
    },
    Client as SsmClient,
};

/// Fetches agent inventory entries matching the provided filters
pub(crate) async fn describe_instance_information(
    client: &SsmClient,
    filters: Vec<InstanceInformationStringFilter>,
) -> Result<Vec<InstanceInformation>, Error> {
    let resp = client
        .describe_instance_information()
        .set_filters(Some(filters))
        .send()
        .await
        .map_err(aws_sdk_ssm::Error::from)?;
    Ok(resp.instance_information_list.unwrap_or_default())
}

/// Submits the command against the targets and returns the assigned command id
pub(crate) async fn send_command(
    client: &SsmClient,
    config: &Config,
    targets: Vec<Target>,
) -> Result<String, Error> {
    let output = config.output.as_ref().filter(|o| !o.bucket.is_empty());
    let resp = client
        .send_command()
        .set_targets(Some(targets))
        .document_name(&config.document)
        .set_parameters(Some(config.parameters.clone()))
        .set_comment(config.comment.clone())
        .timeout_seconds(SEND_TIMEOUT)
        .set_output_s3_bucket_name(output.map(|o| o.bucket.clone()))
        .set_output_s3_key_prefix(output.and_then(|o| o.prefix.clone()))
        .send()
        .await
        .map_err(aws_sdk_ssm::Error::from)?;
    resp.command
        .and_then(|command| command.command_id)
        .ok_or(Error::MissingCommandId)
}

/// Lists per-instance invocation records for a command
pub(crate) async fn list_command_invocations(
    client: &SsmClient,
    command_id: &str,
) -> Result<Vec<CommandInvocation>, Error> {
    let resp = client
        .list_command_invocations()
        .command_id(command_id)
        .send()
        .await
        .map_err(aws_sdk_ssm::Error::from)?;
    Ok(resp.command_invocations.unwrap_or_default())
}

/// Retrieves the command record by id, or an empty record if none exists
pub(crate) async fn get_command(client: &SsmClient, command_id: &str) -> Result<Command, Error> {
    let resp = client
        .list_commands()
        .command_id(command_id)
        .send()
        .await
        .map_err(aws_sdk_ssm::Error::from)?;
    Ok(resp
        .commands
        .unwrap_or_default()
        .into_iter()
        .next()
        .unwrap_or_else(|| Command::builder().build()))
}
