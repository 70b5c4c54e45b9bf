//! Dispatch commands to EC2 fleets via AWS Systems Manager.
//!
//! `fleetcmd` waits for every targeted instance to report an online SSM
//! agent, submits a Run Command execution against the target set, waits for
//! all per-instance invocations to reach a terminal state, and surfaces any
//! output the command persisted to S3.

cfg_if::cfg_if! {
    if #[cfg(feature = "aws")] {
        pub mod aws;
    }
}
