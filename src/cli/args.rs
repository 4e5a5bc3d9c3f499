use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use tsr::ResourceKey;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Stack manifest describing deployments and their state backends
    #[arg(long, global = true, env = "TSR_CONFIG", default_value = "tsr.json")]
    pub config: PathBuf,

    /// Stack used for locators without a `stack/` prefix
    #[arg(long, global = true, env = "TSR_STACK")]
    pub stack: Option<String>,

    /// Ownership registry file (defaults to the user data directory)
    #[arg(long, global = true)]
    pub registry: Option<PathBuf>,

    /// Resource inventory queried in place of the live provider
    #[arg(long, global = true, env = "TSR_PROVIDER_INVENTORY")]
    pub inventory: Option<PathBuf>,

    /// Password for HTTP state backends
    #[arg(long, global = true, env = "TSR_HTTP_PASSWORD", hide_env_values = true)]
    pub http_password: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a transfer without touching any state
    Plan(TransferArgs),
    /// Plan and execute a transfer
    Apply(TransferArgs),
    /// Print the equivalent removed/import blocks for a transfer
    Blocks(TransferArgs),
    /// Show the stack, its deployments and components
    Tree,
    /// Inspect or edit resource ownership
    Owners {
        #[command(subcommand)]
        command: OwnersCommand,
    },
}

#[derive(clap::Args, Debug)]
pub struct TransferArgs {
    /// Source locator, `[stack/]deployment:component:type.name`
    #[arg(long)]
    pub from: String,

    /// Destination locator, `[stack/]deployment:component:type.name`
    #[arg(long)]
    pub to: String,

    /// Require the provider identifier to be unchanged at the destination
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub preserve_id: bool,

    /// JSON file with the destination's declared configuration
    #[arg(long)]
    pub declared: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum OwnersCommand {
    List,
    Claim {
        key: ResourceKey,
        deployment: String,
    },
    Transfer {
        key: ResourceKey,
        from: String,
        to: String,
    },
    AddReader {
        key: ResourceKey,
        deployment: String,
    },
    RemoveReader {
        key: ResourceKey,
        deployment: String,
    },
}
