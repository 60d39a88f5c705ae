// ─── Launch Planner ───
// Turns a staged image plus operator overrides into the exact invocation.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::provision::{RuntimeImage, ServiceIdentity};

pub const DEFAULT_MIN_HEAP_MB: u32 = 1024;
pub const DEFAULT_MAX_HEAP_MB: u32 = 2048;
pub const DEFAULT_PORT: u16 = 25565;

/// Raw operator overrides, as read from flags or the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOverrides {
    pub min_heap: Option<String>,
    pub max_heap: Option<String>,
    pub port: Option<String>,
}

/// Values used when the operator does not override them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LaunchDefaults {
    pub min_heap_mb: u32,
    pub max_heap_mb: u32,
    pub port: u16,
}

impl Default for LaunchDefaults {
    fn default() -> Self {
        Self {
            min_heap_mb: DEFAULT_MIN_HEAP_MB,
            max_heap_mb: DEFAULT_MAX_HEAP_MB,
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub min_heap_mb: u32,
    pub max_heap_mb: u32,
    pub working_dir: PathBuf,
    pub port: u16,
    pub env: BTreeMap<String, String>,
    pub identity: ServiceIdentity,
}

impl LaunchPlan {
    /// Copy/paste friendly rendering of the invocation.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .map(|part| shell_escape(&part))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub struct LaunchPlanner;

impl LaunchPlanner {
    #[instrument(skip_all, fields(variant = %image.variant.id))]
    pub fn plan(
        image: &RuntimeImage,
        overrides: &LaunchOverrides,
        defaults: &LaunchDefaults,
    ) -> LauncherResult<LaunchPlan> {
        let min_heap_mb = match overrides.min_heap.as_deref() {
            Some(raw) => parse_heap("min_heap", raw)?,
            None => defaults.min_heap_mb,
        };
        let max_heap_mb = match overrides.max_heap.as_deref() {
            Some(raw) => parse_heap("max_heap", raw)?,
            None => defaults.max_heap_mb,
        };
        if min_heap_mb > max_heap_mb {
            return Err(LauncherError::InvalidOverride {
                field: "min_heap",
                value: format!("{min_heap_mb}M"),
                reason: format!("greater than max_heap ({max_heap_mb}M)"),
            });
        }
        let port = match overrides.port.as_deref() {
            Some(raw) => parse_port(raw)?,
            None => defaults.port,
        };

        let server_jar = image
            .server_jar
            .strip_prefix(&image.root)
            .map(|rel| rel.to_string_lossy().into_owned())
            .unwrap_or_else(|_| image.server_jar.to_string_lossy().into_owned());

        let mut args = vec![format!("-Xms{min_heap_mb}M"), format!("-Xmx{max_heap_mb}M")];
        args.extend(without_heap_flags(&image.variant.jvm_args));
        args.push("-jar".into());
        args.push(server_jar);
        args.extend(without_port_flag(&image.variant.server_args));
        args.push("--port".into());
        args.push(port.to_string());

        let mut env = BTreeMap::new();
        if let Some(home) = &image.java.java_home {
            env.insert("JAVA_HOME".to_string(), home.to_string_lossy().into_owned());
        }

        let plan = LaunchPlan {
            program: image.java.java_bin.clone(),
            args,
            min_heap_mb,
            max_heap_mb,
            working_dir: image.root.clone(),
            port,
            env,
            identity: image.identity.clone(),
        };
        info!(
            "Planned {} with heap {}M..{}M on port {}",
            image.variant.id, min_heap_mb, max_heap_mb, port
        );
        debug!("Command (copy/paste): {}", plan.command_line());
        Ok(plan)
    }
}

/// Heap size in MiB. Accepts `1024`, `1024M` or `2G`.
pub fn parse_heap(field: &'static str, raw: &str) -> LauncherResult<u32> {
    let invalid = |reason: &str| LauncherError::InvalidOverride {
        field,
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = raw.trim();
    let (digits, multiplier) = match trimmed.char_indices().last() {
        Some((idx, 'M' | 'm')) => (&trimmed[..idx], 1u64),
        Some((idx, 'G' | 'g')) => (&trimmed[..idx], 1024u64),
        _ => (trimmed, 1u64),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("expected a size such as 1024, 1024M or 2G"));
    }
    let value: u64 = digits.parse().map_err(|_| invalid("size out of range"))?;
    if value == 0 {
        return Err(invalid("must be greater than zero"));
    }
    let mib = value
        .checked_mul(multiplier)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| invalid("size out of range"))?;
    Ok(mib)
}

pub fn parse_port(raw: &str) -> LauncherResult<u16> {
    let invalid = |reason: &str| LauncherError::InvalidOverride {
        field: "port",
        value: raw.to_string(),
        reason: reason.to_string(),
    };
    let value: u32 = raw
        .trim()
        .parse()
        .map_err(|_| invalid("expected a number"))?;
    match u16::try_from(value) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(invalid("must be within 1..=65535")),
    }
}

fn without_heap_flags(args: &[String]) -> Vec<String> {
    args.iter()
        .filter(|arg| {
            let heap = arg.starts_with("-Xms") || arg.starts_with("-Xmx");
            if heap {
                debug!("Dropping variant heap flag {} in favour of the plan", arg);
            }
            !heap
        })
        .cloned()
        .collect()
}

fn without_port_flag(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--port" {
            iter.next();
            continue;
        }
        if arg.starts_with("--port=") {
            continue;
        }
        out.push(arg.clone());
    }
    out
}

fn shell_escape(raw: &str) -> String {
    if raw.is_empty() {
        return "\"\"".to_string();
    }
    if raw
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':' | '='))
    {
        return raw.to_string();
    }
    format!("\"{}\"", raw.replace('"', "\\\""))
}
