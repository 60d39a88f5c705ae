use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::error;

use server_launcher_lib::commands;
use server_launcher_lib::core::launch::LaunchOverrides;
use server_launcher_lib::core::pipeline::{DEFAULT_INSTANCE_NAME, DEFAULT_OWNER, LaunchRequest};
use server_launcher_lib::core::state::AppState;
use server_launcher_lib::core::variant::{SyncOptions, parse_mod_list};
use server_launcher_lib::{LauncherError, LauncherResult};

#[derive(Parser, Debug)]
#[command(name = "server-launcher", author, version, about, long_about = None)]
struct Cli {
    /// Directory holding catalog.json, launcher_settings.json, eula.txt and servers/
    #[arg(long, env = "LAUNCHER_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve, stage and run a server, supervising it until it stops
    Launch(LaunchArgs),
    /// Resolve and stage a server, then print its launch plan as JSON
    Plan(LaunchArgs),
    /// List catalog variants
    Variants,
    /// Record acceptance of the server EULA
    AcceptEula,
    /// Refresh vanilla variants from Mojang's version manifest
    CatalogSync {
        /// Also register the latest snapshot as vanilla/snapshot
        #[arg(long)]
        snapshot: bool,
        /// Additional version ids to register
        #[arg(long = "version")]
        versions: Vec<String>,
    },
    /// List or delete instances
    Instances {
        #[command(subcommand)]
        action: Option<InstanceAction>,
    },
    /// Print the effective settings
    Settings {
        /// Write them to launcher_settings.json
        #[arg(long)]
        write: bool,
    },
}

#[derive(Subcommand, Debug)]
enum InstanceAction {
    List,
    Delete { id_or_name: String },
}

#[derive(Args, Debug)]
struct LaunchArgs {
    /// Variant id or alias, e.g. vanilla/latest or modded/foo
    #[arg(long, env = "VARIANT", default_value = "vanilla/latest")]
    variant: String,

    /// Comma-separated mod ids, URLs or .jar paths
    #[arg(long, env = "MODS", default_value = "")]
    mods: String,

    /// Instance name to create or reuse
    #[arg(long, default_value = DEFAULT_INSTANCE_NAME)]
    name: String,

    #[arg(long, default_value = DEFAULT_OWNER)]
    owner: String,

    /// Minimum heap (1024, 1024M, 2G)
    #[arg(long, env = "SERVER_MIN_HEAP")]
    min_heap: Option<String>,

    /// Maximum heap (1024, 1024M, 2G)
    #[arg(long, env = "SERVER_MAX_HEAP")]
    max_heap: Option<String>,

    #[arg(long, env = "SERVER_PORT")]
    port: Option<String>,

    /// EULA acceptance file to check instead of <data-dir>/eula.txt
    #[arg(long)]
    eula: Option<PathBuf>,
}

impl LaunchArgs {
    fn into_request(self) -> LaunchRequest {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        LaunchRequest {
            name: self.name,
            owner: self.owner,
            variant: self.variant,
            mods: parse_mod_list(&self.mods),
            overrides: LaunchOverrides {
                min_heap: non_empty(self.min_heap),
                max_heap: non_empty(self.max_heap),
                port: non_empty(self.port),
            },
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    server_launcher_lib::init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.stage() {
                Some(stage) => eprintln!("{stage}: {err}"),
                None => eprintln!("error: {err}"),
            }
            error!("Exiting with code {}", err.exit_code());
            ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> LauncherResult<()> {
    let mut state = AppState::load(cli.data_dir).await?;

    match cli.command {
        Command::Launch(mut args) => {
            if let Some(eula) = args.eula.take() {
                state.settings.license_path = Some(eula);
            }
            commands::launch(&state, args.into_request()).await
        }
        Command::Plan(mut args) => {
            if let Some(eula) = args.eula.take() {
                state.settings.license_path = Some(eula);
            }
            let plan = commands::plan(&state, args.into_request()).await?;
            print_json(&plan)
        }
        Command::Variants => {
            for variant in commands::list_variants(&state)? {
                if variant.aliases.is_empty() {
                    println!("{}  (java {})", variant.id, variant.java_major);
                } else {
                    println!(
                        "{}  (java {}; aliases: {})",
                        variant.id,
                        variant.java_major,
                        variant.aliases.join(", ")
                    );
                }
            }
            Ok(())
        }
        Command::AcceptEula => {
            let path = commands::accept_eula(&state).await?;
            println!("EULA accepted in {}", path.display());
            Ok(())
        }
        Command::CatalogSync { snapshot, versions } => {
            let options = SyncOptions {
                include_snapshot: snapshot,
                versions,
            };
            let written = commands::sync_catalog(&state, &options).await?;
            println!("Wrote {written} vanilla variants to {}", state.catalog_path().display());
            Ok(())
        }
        Command::Instances { action } => match action.unwrap_or(InstanceAction::List) {
            InstanceAction::List => {
                for instance in commands::list_instances(&state).await? {
                    println!(
                        "{}  {:<16} {:<10} {:<11} {}",
                        instance.id, instance.name, instance.owner, instance.state, instance.variant_id
                    );
                }
                Ok(())
            }
            InstanceAction::Delete { id_or_name } => {
                let deleted = commands::delete_instance(&state, &id_or_name).await?;
                println!("Deleted {} ({})", deleted.name, deleted.id);
                Ok(())
            }
        },
        Command::Settings { write } => print_json(&commands::settings(&state, write)?),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> LauncherResult<()> {
    let json = serde_json::to_string_pretty(value).map_err(LauncherError::from)?;
    println!("{json}");
    Ok(())
}
