use crate::cli::CheckArgs;
use crate::commands::run::mode_for;
use crate::config::PartialPipelineConfig;
use crate::error::Result;
use stepfold::engine::{
    config::{CommandSpec, PipelineConfig, PredictionMode},
    tools::{ResolvedResources, resolve_resources, system_search_path},
};
use tracing::info;

pub fn run(args: CheckArgs) -> Result<()> {
    let mode = mode_for(args.multimer);
    let config = PartialPipelineConfig::from_file(&args.config)?.merge_with_cli(&[], mode)?;

    info!("Resolving executables and databases for {} mode...", mode);
    let search_path = system_search_path();
    let resources = resolve_resources(&config, mode, search_path.as_deref())?;

    for line in describe(&config, &resources, mode) {
        println!("{}", line);
    }
    Ok(())
}

fn describe(
    config: &PipelineConfig,
    resources: &ResolvedResources,
    mode: PredictionMode,
) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(path) = &resources.alphafold_path {
        lines.push(format!("alphafold: {}", path.display()));
    }
    lines.push("Executables:".to_string());
    for (name, path) in &resources.executables {
        lines.push(format!("  {:<20} {}", name, path.display()));
    }
    lines.push("Databases:".to_string());
    for (kind, path) in &resources.databases {
        lines.push(format!("  {:<20} {}", kind.name, path.display()));
    }

    let commands = &config.commands;
    lines.push("Steps:".to_string());
    lines.push(format!("  {:<20} {}", "search", command_line(&commands.search)));
    lines.push(format!("  {:<20} {}", "inference", command_line(&commands.inference)));
    lines.push(format!(
        "  {:<20} {}",
        "relax",
        commands
            .relax
            .as_ref()
            .map(command_line)
            .unwrap_or_else(|| "(not configured)".to_string())
    ));
    lines.push(format!("✓ Configuration is valid for {} predictions.", mode));
    lines
}

fn command_line(spec: &CommandSpec) -> String {
    std::iter::once(spec.program.as_str())
        .chain(spec.args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}
