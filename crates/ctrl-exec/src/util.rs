use std::{collections::BTreeMap, time::Duration};

use tokio::process::{Child, Command};

use crate::error::ExecError;

/// Build a command from a job's argv.
pub fn cmd_program(argv: &[String]) -> Result<Command, ExecError> {
    let (program, args) = argv.split_first().ok_or(ExecError::MissingProgram)?;
    if program.trim().is_empty() {
        return Err(ExecError::MissingProgram);
    }
    let mut cmd = Command::new(program);
    cmd.args(args.iter().map(|s| s.as_str()));
    Ok(cmd)
}

/// SIGTERM, wait up to `grace`, then SIGKILL.
pub async fn kill_graceful(child: &mut Child, grace: Duration) -> std::io::Result<()> {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            if let Some(id) = child.id() {
                let _ = kill(Pid::from_raw(id as i32), Signal::SIGTERM);
                if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                    return Ok(());
                }
            }
        } else {
            let _ = grace;
        }
    }
    child.kill().await
}

/// `true` if `labels` carry every pair of `selector`, values compared verbatim.
pub fn matches_selector(
    labels: &BTreeMap<String, String>,
    selector: &BTreeMap<String, String>,
) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}
