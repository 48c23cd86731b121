use super::{ChannelError, NotificationOutcome, OsNotification, OsNotifier, Permission};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Desktop notifications through a `notify-send` compatible program.
///
/// Permission starts as `Default`; [`OsNotifier::request_permission`] probes
/// the program once and settles on `Granted` or `Denied`.
#[derive(Debug)]
pub struct DesktopNotifier {
    program: String,
    app_name: String,
    permission: Mutex<Permission>,
}

impl DesktopNotifier {
    pub fn new(program: impl Into<String>) -> Self {
        Self::with_permission(program, Permission::Default)
    }

    pub fn with_permission(program: impl Into<String>, permission: Permission) -> Self {
        Self {
            program: program.into(),
            app_name: "order-bell".to_string(),
            permission: Mutex::new(permission),
        }
    }

    fn set_permission(&self, permission: Permission) {
        if let Ok(mut guard) = self.permission.lock() {
            *guard = permission;
        }
    }

    pub fn args(&self, n: &OsNotification) -> Vec<String> {
        let mut args = vec![
            format!("--app-name={}", self.app_name),
            format!("--hint=string:x-dunst-stack-tag:{}", n.tag),
            format!("--hint=string:x-canonical-private-synchronous:{}", n.tag),
        ];
        if !n.icon.is_empty() {
            args.push(format!("--icon={}", n.icon));
        }
        if n.require_interaction {
            args.push("--urgency=critical".to_string());
        }
        for action in &n.actions {
            args.push(format!("--action={}={}", action.action, action.title));
        }
        args.push(n.title.clone());
        args.push(n.body.clone());
        args
    }
}

#[async_trait]
impl OsNotifier for DesktopNotifier {
    fn permission(&self) -> Permission {
        self.permission
            .lock()
            .map(|p| *p)
            .unwrap_or(Permission::Denied)
    }

    #[instrument(skip_all)]
    async fn request_permission(&self) -> Permission {
        let current = self.permission();
        if current != Permission::Default {
            return current;
        }
        let probe = Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;
        let permission = match probe {
            Ok(status) if status.success() => Permission::Granted,
            Ok(status) => {
                debug!(%status, program = %self.program, "notifier probe failed");
                Permission::Denied
            }
            Err(err) => {
                debug!(%err, program = %self.program, "notifier not available");
                Permission::Denied
            }
        };
        info!(?permission, "desktop notification permission settled");
        self.set_permission(permission);
        permission
    }

    async fn show(&self, notification: &OsNotification) -> Result<NotificationOutcome, ChannelError> {
        let permission = self.permission();
        if permission != Permission::Granted {
            return Err(ChannelError::PermissionDenied(permission));
        }
        let output = Command::new(&self.program)
            .args(self.args(notification))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            return Err(ChannelError::Failed(format!(
                "{} exited with status {}",
                self.program, output.status
            )));
        }
        if notification.actions.is_empty() {
            return Ok(NotificationOutcome::Displayed);
        }
        // With actions the program waits and prints the chosen action key.
        let chosen = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if chosen.is_empty() {
            Ok(NotificationOutcome::Closed)
        } else {
            Ok(NotificationOutcome::Activated {
                action: Some(chosen),
            })
        }
    }
}
