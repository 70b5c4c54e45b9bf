//! `status` subcommand: reports the current state of a dispatched command

use crate::aws::{ssm, Clients, Error};
use tracing::info;

/// Looks up a command by id and reports its status
pub async fn status(command_id: &str, region: Option<String>) -> Result<(), Error> {
    let clients = Clients::from_env(region).await;
    let command = ssm::get_command(&clients.ssm, command_id).await?;
    match command.command_id() {
        Some(id) => info!(
            command_id = id,
            document = command.document_name().unwrap_or_default(),
            status = command.status().map(|s| s.as_str()).unwrap_or_default(),
            targets = command.target_count(),
            completed = command.completed_count(),
            errors = command.error_count(),
            "command status"
        ),
        None => info!(command_id, "command not found"),
    }
    Ok(())
}
