// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use libc::SIGKILL;
use std::{convert::Infallible, os::unix::process::CommandExt};
use tokio::process::Child;

/// Puts the runner in a process group of its own, so that the processes it launches (the test
/// host, or the runner itself under a coverage tool) can be killed along with it.
pub(super) fn set_process_group(cmd: &mut std::process::Command) {
    cmd.process_group(0);
}

#[derive(Debug)]
pub(super) struct Job(());

pub(super) fn create_job() -> Result<Job, Infallible> {
    Ok(Job(()))
}

pub(super) fn assign_process_to_job(_child: &Child, _job: Option<&Job>) -> Result<(), Infallible> {
    Ok(())
}

/// Sends SIGKILL to the runner's process group.
pub(super) fn kill_process_tree(child: &Child, _job: Option<&Job>) {
    // A missing id means the child has already been reaped.
    if let Some(pid) = child.id() {
        // The runner leads its own group, so the group id is its pid.
        unsafe {
            libc::kill(-(pid as libc::pid_t), SIGKILL);
        }
    }
}
