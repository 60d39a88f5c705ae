// ─── Service Identity ───
// The non-root user/group a staged server runs as.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::core::error::{LauncherError, LauncherResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceIdentity {
    pub user: String,
    pub group: String,
    pub uid: u32,
    pub gid: u32,
}

impl ServiceIdentity {
    pub fn is_root(&self) -> bool {
        self.uid == 0
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create or reuse the identity named `user`/`group`.
    async fn ensure(&self, user: &str, group: &str) -> LauncherResult<ServiceIdentity>;
}

/// Uses the host's account database through `id`, `groupadd` and `useradd`.
///
/// When running as root the identity is created if missing. Otherwise the
/// server runs as the invoking user, since only root may switch to another
/// uid. Root is never returned.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemIdentityProvider;

#[async_trait]
impl IdentityProvider for SystemIdentityProvider {
    async fn ensure(&self, user: &str, group: &str) -> LauncherResult<ServiceIdentity> {
        resolve_identity(&HostAccounts, user, group).await
    }
}

/// Account database operations behind [`SystemIdentityProvider`].
#[async_trait]
trait Accounts: Send + Sync {
    fn privileged(&self) -> bool;
    async fn lookup(&self, user: &str) -> Option<ServiceIdentity>;
    async fn invoking(&self) -> LauncherResult<ServiceIdentity>;
    async fn create(&self, user: &str, group: &str) -> LauncherResult<()>;
}

struct HostAccounts;

#[async_trait]
impl Accounts for HostAccounts {
    fn privileged(&self) -> bool {
        running_as_root()
    }

    async fn lookup(&self, user: &str) -> Option<ServiceIdentity> {
        lookup(user).await
    }

    async fn invoking(&self) -> LauncherResult<ServiceIdentity> {
        invoking_identity().await
    }

    async fn create(&self, user: &str, group: &str) -> LauncherResult<()> {
        create(user, group).await
    }
}

async fn resolve_identity(
    accounts: &dyn Accounts,
    user: &str,
    group: &str,
) -> LauncherResult<ServiceIdentity> {
    validate_name(user)?;
    validate_name(group)?;

    let identity = if accounts.privileged() {
        match accounts.lookup(user).await {
            Some(identity) => identity,
            None => {
                accounts.create(user, group).await?;
                accounts.lookup(user).await.ok_or_else(|| {
                    LauncherError::Other(format!("user '{user}' still missing after useradd"))
                })?
            }
        }
    } else {
        let current = accounts.invoking().await?;
        if current.user != user {
            warn!(
                "Not running as root, so the server runs as '{}' instead of '{}'",
                current.user, user
            );
        }
        current
    };

    if identity.is_root() {
        return Err(LauncherError::Other(format!(
            "refusing to run the server as root (identity '{}')",
            identity.user
        )));
    }
    Ok(identity)
}

pub fn running_as_root() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail.
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

fn validate_name(name: &str) -> LauncherResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 32
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(LauncherError::Other(format!(
            "invalid service account name '{name}'"
        )))
    }
}

async fn id_field(args: &[&str]) -> Option<String> {
    let output = tokio::process::Command::new("id")
        .args(args)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}

async fn lookup(user: &str) -> Option<ServiceIdentity> {
    let uid = id_field(&["-u", user]).await?.parse().ok()?;
    let gid = id_field(&["-g", user]).await?.parse().ok()?;
    let group = id_field(&["-gn", user]).await?;
    Some(ServiceIdentity {
        user: user.to_string(),
        group,
        uid,
        gid,
    })
}

async fn invoking_identity() -> LauncherResult<ServiceIdentity> {
    let missing = || LauncherError::Other("cannot determine the invoking user".into());
    let user = id_field(&["-un"]).await.ok_or_else(missing)?;
    lookup(&user).await.ok_or_else(missing)
}

async fn create(user: &str, group: &str) -> LauncherResult<()> {
    // groupadd exits 9 when the group already exists.
    run_admin("groupadd", &["--system", group], &[0, 9]).await?;
    run_admin(
        "useradd",
        &[
            "--system",
            "--no-create-home",
            "--shell",
            "/usr/sbin/nologin",
            "--gid",
            group,
            user,
        ],
        &[0],
    )
    .await?;
    info!("Created service account {}:{}", user, group);
    Ok(())
}

async fn run_admin(program: &str, args: &[&str], ok_codes: &[i32]) -> LauncherResult<()> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| LauncherError::Other(format!("failed to run {program}: {e}")))?;
    match output.status.code() {
        Some(code) if ok_codes.contains(&code) => Ok(()),
        code => Err(LauncherError::Other(format!(
            "{program} exited with {:?}: {}",
            code,
            String::from_utf8_lossy(&output.stderr).trim()
        ))),
    }
}
