use crate::cli::RunArgs;
use crate::commands::rank::print_report;
use crate::config::PartialPipelineConfig;
use crate::error::Result;
use crate::utils::{parser, progress::CliProgressHandler};
use stepfold::{
    engine::{
        config::PredictionMode,
        progress::ProgressReporter,
        tools::{resolve_resources, system_search_path},
    },
    workflows::pipeline::{self, PipelineRequest, SystemCommandRunner},
};
use tracing::info;

pub fn run(args: RunArgs) -> Result<()> {
    let mode = mode_for(args.multimer);

    let partial_config = PartialPipelineConfig::from_file(&args.config)?;
    info!("Merging configuration from file and CLI arguments...");
    let config = partial_config.merge_with_cli(&args.set_values, mode)?;
    let request = build_request(&args, mode)?;

    info!("Validating executables and databases for {} mode...", mode);
    let search_path = system_search_path();
    let resources = resolve_resources(&config, mode, search_path.as_deref())?;

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!(
        "Predicting {} with {} model(s) in {} mode...",
        request.input_fasta.display(),
        request.models.len(),
        mode
    );
    let report = pipeline::run(&request, &config, &resources, &SystemCommandRunner, &reporter)?;

    if let Some(ranking) = report.ranking() {
        print_report(ranking);
    }
    Ok(())
}

pub fn mode_for(multimer: bool) -> PredictionMode {
    if multimer {
        PredictionMode::Multimer
    } else {
        PredictionMode::Monomer
    }
}

fn build_request(args: &RunArgs, mode: PredictionMode) -> Result<PipelineRequest> {
    let mut request =
        PipelineRequest::new(args.input_fasta.clone(), args.output_dir.clone(), mode);
    if let Some(list) = &args.models {
        request.models = pipeline::parse_models(list, mode)?;
    }
    if let Some(date) = &args.max_template_date {
        request.max_template_date = parser::format_template_date(parser::parse_template_date(date)?);
    }
    request.skip_refine = args.skip_refine;
    request.is_prokaryote = args.is_prokaryote;
    Ok(request)
}
