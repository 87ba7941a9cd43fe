//! External actuation: binding and unbinding a volume group's address.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error};

use havg_types::{make_error_msg, Duration, Result, VgCode};

/// Direction of an actuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpDown {
    Up,
    Down,
}

impl UpDown {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpDown::Up => "up",
            UpDown::Down => "down",
        }
    }
}

impl fmt::Display for UpDown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that can bring a volume group's address up or down on this
/// host. The production implementation shells out; tests substitute
/// recording fakes.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn run(
        &self,
        op: UpDown,
        vg: &str,
        ip_addr: &str,
        netmask: &str,
        nic: &str,
    ) -> Result<()>;
}

/// Invokes the configured script as `script up|down <vg> <ip> <mask> <nic>`
/// and maps its exit code onto the result. The script contract is
/// idempotent: up on an already-up group (and down on a down one) exits 0.
pub struct ScriptActuator {
    path: PathBuf,
    timeout: std::time::Duration,
}

impl ScriptActuator {
    pub fn new(path: PathBuf, timeout: Duration) -> Self {
        Self {
            path,
            timeout: timeout.into(),
        }
    }
}

#[async_trait]
impl Actuator for ScriptActuator {
    async fn run(
        &self,
        op: UpDown,
        vg: &str,
        ip_addr: &str,
        netmask: &str,
        nic: &str,
    ) -> Result<()> {
        let fut = Command::new(&self.path)
            .arg(op.as_str())
            .arg(vg)
            .arg(ip_addr)
            .arg(netmask)
            .arg(nic)
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return make_error_msg(
                    VgCode::ACTUATION_FAILED,
                    format!("failed to spawn {}: {}", self.path.display(), err),
                );
            }
            Err(_) => {
                error!(script = %self.path.display(), %op, vg, "script timed out");
                return make_error_msg(
                    VgCode::ACTUATION_FAILED,
                    format!("{} {} timed out after {:?}", op, vg, self.timeout),
                );
            }
        };

        // Output is captured for diagnostics only.
        debug!(
            %op,
            vg,
            status = %output.status,
            stdout = %String::from_utf8_lossy(&output.stdout),
            stderr = %String::from_utf8_lossy(&output.stderr),
            "script finished"
        );

        if output.status.success() {
            Ok(())
        } else {
            make_error_msg(
                VgCode::ACTUATION_FAILED,
                format!("{} {} exited with {}", op, vg, output.status),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_up_down_strings() {
        assert_eq!(UpDown::Up.as_str(), "up");
        assert_eq!(format!("{}", UpDown::Down), "down");
    }

    #[tokio::test]
    async fn test_script_success_exit() {
        // `true` ignores its arguments and exits 0.
        let act = ScriptActuator::new(PathBuf::from("/bin/true"), Duration::from_secs(5));
        act.run(UpDown::Up, "vg0", "10.0.0.1", "255.255.255.0", "eth0")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_script_failure_exit() {
        let act = ScriptActuator::new(PathBuf::from("/bin/false"), Duration::from_secs(5));
        let err = act
            .run(UpDown::Up, "vg0", "10.0.0.1", "255.255.255.0", "eth0")
            .await
            .unwrap_err();
        assert_eq!(err.code(), VgCode::ACTUATION_FAILED);
    }

    #[tokio::test]
    async fn test_script_missing_binary() {
        let act = ScriptActuator::new(
            PathBuf::from("/nonexistent/vg_up_down.sh"),
            Duration::from_secs(5),
        );
        let err = act
            .run(UpDown::Down, "vg0", "10.0.0.1", "255.255.255.0", "eth0")
            .await
            .unwrap_err();
        assert_eq!(err.code(), VgCode::ACTUATION_FAILED);
    }
}
