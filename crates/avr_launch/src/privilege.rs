//! Root privilege handling
//!
//! Docker and the serial devices need root. When started as a normal
//! user the launcher runs itself again through `sudo`.

use std::ffi::OsString;
use tokio::process::Command;

/// Whether the process runs with an effective uid of 0
pub fn is_root() -> bool {
    #[cfg(unix)]
    {
        nix::unistd::geteuid().is_root()
    }

    #[cfg(not(unix))]
    {
        true
    }
}

/// Command line used to re-run the current invocation through sudo
pub fn sudo_command() -> std::io::Result<(String, Vec<OsString>)> {
    let exe = std::env::current_exe()?;
    let mut args = vec![exe.into_os_string()];
    args.extend(std::env::args_os().skip(1));
    Ok(("sudo".to_string(), args))
}

/// Run the current invocation again under sudo and return its exit code.
///
/// Ctrl+C is left to the child, which shuts its containers down itself.
pub async fn reexec_with_sudo() -> std::io::Result<i32> {
    log::info!("Needing sudo privileges, re-launching");

    if let Err(e) = ctrlc::set_handler(|| log::debug!("Interrupt forwarded to sudo child")) {
        log::debug!("Could not install interrupt handler: {}", e);
    }

    let (program, args) = sudo_command()?;
    let status = Command::new(program).args(args).status().await?;
    Ok(status.code().unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sudo_command_runs_current_exe() {
        let (program, args) = sudo_command().unwrap();
        assert_eq!(program, "sudo");
        assert_eq!(
            args[0],
            std::env::current_exe().unwrap().into_os_string()
        );
    }
}
