//! Privileged driver install/uninstall
//!
//! The controller never escalates privileges itself. It hands a script name
//! to a [`ScriptRunner`], which decides how to obtain administrator rights.

use crate::error::DriverError;
use std::path::PathBuf;
use std::process::Command;
use tracing::{info, warn};

/// Runs a named installer script with elevated privileges
pub trait ScriptRunner: Send + Sync {
    /// Blocks until the script exits. `Ok(false)` when it ran but failed
    /// or the user declined the prompt.
    fn run_privileged(&self, script: &str) -> Result<bool, DriverError>;
}

/// Runs `<scripts_dir>/<name>.sh` through `osascript` with an admin prompt
pub struct OsascriptRunner {
    scripts_dir: PathBuf,
}

impl OsascriptRunner {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
        }
    }

    fn script_path(&self, script: &str) -> PathBuf {
        self.scripts_dir.join(format!("{}.sh", script))
    }
}

impl ScriptRunner for OsascriptRunner {
    fn run_privileged(&self, script: &str) -> Result<bool, DriverError> {
        let path = self.script_path(script);
        if !path.exists() {
            return Err(DriverError::Script {
                script: script.to_string(),
                message: format!("{} not found", path.display()),
            });
        }

        let osascript_command = format!(
            "do shell script \"/bin/sh '{}'\" with administrator privileges",
            path.display()
        );
        info!("[Driver] Running {}", osascript_command);

        let output = Command::new("osascript")
            .arg("-e")
            .arg(&osascript_command)
            .output()
            .map_err(|e| DriverError::Script {
                script: script.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("[Driver] {} failed: {}", script, stderr.trim());
            return Ok(false);
        }
        Ok(true)
    }
}
