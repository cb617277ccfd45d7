use std::{
    ffi::OsString,
    path::Path,
    process::Stdio,
    time::Instant,
};

use tracing::{debug, warn};

use super::{discovery::Capability, error::ConvertError};

const STDERR_LIMIT: usize = 4 * 1024;

/// Run an external tool to completion inside `cwd`.
///
/// The child is killed if the returned future is dropped, which is how the per-request
/// deadline terminates a runaway renderer.
pub(crate) async fn run(
    capability: &Capability,
    args: &[OsString],
    cwd: &Path,
    stage: &'static str,
) -> Result<(), ConvertError> {
    let started_at = Instant::now();
    debug!(
        target = "presswork::application::convert::process",
        op = "process::run",
        stage,
        invocation = %capability.display_invocation(),
        args = %join_args(args),
        "Launching external process"
    );

    let output = capability
        .command()
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ConvertError::Spawn {
            program: capability.display_invocation(),
            source,
        })?;

    if !output.status.success() {
        let stderr = truncate_diagnostics(&output.stderr);
        warn!(
            target = "presswork::application::convert::process",
            op = "process::run",
            stage,
            result = "error",
            status = %output.status,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            stderr = %stderr,
            "External process failed"
        );
        return Err(ConvertError::Process {
            stage,
            status: output.status.to_string(),
            stderr,
        });
    }

    debug!(
        target = "presswork::application::convert::process",
        op = "process::run",
        stage,
        result = "ok",
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "External process finished"
    );
    Ok(())
}

fn join_args(args: &[OsString]) -> String {
    args.iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate_diagnostics(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_LIMIT {
        return text.to_string();
    }
    let mut end = STDERR_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
