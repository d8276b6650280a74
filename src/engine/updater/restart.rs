//! Restart hooks run after a successful apply

use std::env;
use std::process::Command;
use tracing::{error, info, warn};

pub trait RestartHook: Send + Sync {
    /// Called once, after `version` is installed
    fn restart(&self, version: &str);
}

/// Re-executes the running binary with the same arguments
#[derive(Debug, Default)]
pub struct ProcessRestart;

impl RestartHook for ProcessRestart {
    fn restart(&self, version: &str) {
        let binary = match env::current_exe() {
            Ok(path) => path,
            Err(e) => {
                error!(error = %e, "Cannot locate own binary, exiting for supervisor restart");
                std::process::exit(1);
            }
        };
        let args: Vec<String> = env::args().skip(1).collect();
        info!(version, binary = %binary.display(), "Restarting into new firmware");

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            let err = Command::new(&binary).args(&args).exec();
            error!(error = %err, "Failed to exec");
            std::process::exit(1);
        }

        #[cfg(not(unix))]
        {
            match Command::new(&binary).args(&args).spawn() {
                Ok(_) => std::process::exit(0),
                Err(e) => {
                    error!(error = %e, "Failed to launch");
                    std::process::exit(1);
                }
            }
        }
    }
}

/// Leaves the process running; the operator restarts the device
#[derive(Debug, Default)]
pub struct NoRestart;

impl RestartHook for NoRestart {
    fn restart(&self, version: &str) {
        warn!(version, "Update installed, restart the device to run it");
    }
}
