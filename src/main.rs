mod cli;

use std::path::{Path, PathBuf};

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr, eyre};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, OwnersCommand, TransferArgs};
use tsr::schema::ResourceConfig;
use tsr::{
    Coordinator, OwnershipRegistry, ResourceLocator, StackManifest, TransferRequest, output,
    providers, terraform,
};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let registry_path = registry_path(&cli)?;

    if let Command::Owners { command } = cli.command {
        return owners(command, &registry_path).await;
    }

    let manifest = StackManifest::load(&cli.config).await?;
    let base_dir = cli
        .config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let locator = manifest.build_locator(base_dir, cli.http_password.as_deref())?;

    if let Command::Tree = cli.command {
        for stack in locator.stacks() {
            println!("{}", output::stack_tree(stack));
        }
        return Ok(());
    }

    let inventory = cli.inventory.clone().or_else(|| manifest.inventory_path(base_dir));
    let provider = providers::get_provider(&manifest.provider.name, inventory.as_deref()).await?;
    let registry = OwnershipRegistry::load(&registry_path).await?;

    let mut coordinator = Coordinator::new(locator, provider)
        .with_registry(registry)
        .with_retry_policy(manifest.retry);
    let default_stack = cli.stack.as_deref().unwrap_or(&manifest.stack);

    match cli.command {
        Command::Plan(args) => {
            let request = transfer_request(&args, default_stack).await?;
            let plan = coordinator.plan(request).await?;
            println!("{}", output::plan_table([&plan]));
        }
        Command::Blocks(args) => {
            let request = transfer_request(&args, default_stack).await?;
            let plan = coordinator.plan(request).await?;
            print!("{}", terraform::blocks::render_plan(&plan));
        }
        Command::Apply(args) => {
            let request = transfer_request(&args, default_stack).await?;
            let plan = coordinator.plan(request).await?;
            let result = coordinator.execute(plan.id).await;

            coordinator.registry().save(&registry_path).await?;
            if let Some(plan) = coordinator.get_plan(plan.id) {
                println!("{}", output::plan_table([plan]));
            }

            let report = result?;
            println!("{}", output::report_summary(&report));
            coordinator.confirm(plan.id)?;
        }
        Command::Tree | Command::Owners { .. } => {}
    }

    Ok(())
}

fn registry_path(cli: &Cli) -> Result<PathBuf> {
    cli.registry
        .clone()
        .or_else(OwnershipRegistry::default_path)
        .ok_or_else(|| eyre!("no data directory available, pass --registry"))
}

async fn transfer_request(args: &TransferArgs, default_stack: &str) -> Result<TransferRequest> {
    let source = ResourceLocator::parse(&args.from, default_stack)?;
    let destination = ResourceLocator::parse(&args.to, default_stack)?;
    let mut request = TransferRequest::new(source, destination, args.preserve_id);

    if let Some(path) = &args.declared {
        let json = tokio::fs::read_to_string(path)
            .await
            .wrap_err_with(|| format!("reading {}", path.display()))?;
        let declared: ResourceConfig = serde_json::from_str(&json)
            .wrap_err_with(|| format!("parsing {}", path.display()))?;
        request = request.with_declared(declared);
    }

    Ok(request)
}

async fn owners(command: OwnersCommand, path: &Path) -> Result<()> {
    let mut registry = OwnershipRegistry::load(path).await?;

    match command {
        OwnersCommand::List => {
            println!("{}", output::owner_table(registry.records()));
            return Ok(());
        }
        OwnersCommand::Claim { key, deployment } => registry.claim(&key, &deployment)?,
        OwnersCommand::Transfer { key, from, to } => registry.transfer(&key, &from, &to)?,
        OwnersCommand::AddReader { key, deployment } => {
            if !registry.add_reader(&key, &deployment)? {
                tracing::info!(%key, deployment = %deployment, "reader already recorded");
            }
        }
        OwnersCommand::RemoveReader { key, deployment } => {
            if !registry.remove_reader(&key, &deployment)? {
                tracing::info!(%key, deployment = %deployment, "deployment was not a reader");
            }
        }
    }

    registry.save(path).await?;
    Ok(())
}
