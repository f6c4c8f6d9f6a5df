//! End-to-end probe of the Cloud API.
//!
//! A run provisions a two-server data center, checks it, resizes the
//! frontend, proves the servers can talk over the private LAN, and deletes
//! everything again:
//!
//! 1. `create-datacenter` - composite create, make LAN 1 public, verify
//! 2. `frontend-running` - frontend is `AVAILABLE` and `RUNNING`
//! 3. `resize-frontend` - bump cores/RAM and verify the new size
//! 4. `file-transfer` - wait for SSH, create a file on the frontend, `scp` it
//!    to the backend and list it there
//!
//! The first failing step stops the run. [`Probe::run`] always returns a
//! [`ProbeReport`]; it never returns an error.

mod error;
mod report;
mod scenario;
mod topology;
mod transfer;

pub use error::{CheckError, StepError, check_eq, check_some_eq};
pub use report::{ProbeReport, StepName, StepReport, StepStatus};
pub use scenario::{Probe, delete_datacenter};
pub use topology::{PRIVATE_LAN, PUBLIC_LAN, PUBLIC_LAN_NAME, describe_datacenter};
pub use transfer::{TransferOutcome, TransferPlan, run_transfer, ssh_poller, wait_for_ssh};
