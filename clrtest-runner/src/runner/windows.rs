// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use tokio::process::Child;
pub(super) use win32job::Job;
use win32job::JobError;
use windows_sys::Win32::System::JobObjects::TerminateJobObject;

pub(super) fn set_process_group(_cmd: &mut std::process::Command) {}

pub(super) fn create_job() -> Result<Job, JobError> {
    Job::create_with_limit_info(win32job::ExtendedLimitInfo::new().limit_breakaway_ok())
}

pub(super) fn assign_process_to_job(child: &Child, job: Option<&Job>) -> Result<(), JobError> {
    if let Some(job) = job {
        // A missing handle means the child has already exited.
        let Some(handle) = child.raw_handle() else {
            return Ok(());
        };
        job.assign_process(handle as isize)?;
    }
    Ok(())
}

/// Terminates every process in the runner's job object.
pub(super) fn kill_process_tree(_child: &Child, job: Option<&Job>) {
    if let Some(job) = job {
        let handle = job.handle();
        unsafe {
            // Errors here mean the processes have already exited.
            _ = TerminateJobObject(handle as _, 1);
        }
    }
}
