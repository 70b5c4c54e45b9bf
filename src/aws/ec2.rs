//! AWS EC2 SDK wrappers for compute inventory queries

use crate::aws::Error;
use aws_sdk_ec2::{
    types::{Filter, Reservation},
    Client as Ec2Client,
};

/// Fetches all reservations matching the provided filters
pub(crate) async fn describe_instances(
    client: &Ec2Client,
    filters: Vec<Filter>,
) -> Result<Vec<Reservation>, Error> {
    let resp = client
        .describe_instances()
        .set_filters(Some(filters))
        .send()
        .await
        .map_err(aws_sdk_ec2::Error::from)?;
    Ok(resp.reservations.unwrap_or_default())
}
