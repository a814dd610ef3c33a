//! The four-step prediction pipeline: search, inference, relaxation and ranking.
//!
//! The first three steps belong to the prediction framework and run as external commands;
//! ranking runs in-process through [`crate::workflows::rank`]. Stages run strictly in order
//! and the first failure stops the pipeline.

use crate::core::models::artifacts::ModelArtifacts;
use crate::engine::config::{CommandSpec, PipelineConfig, PredictionMode, RankingConfig};
use crate::engine::error::PipelineError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::tools::ResolvedResources;
use crate::workflows::rank::{self, RankingReport};
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, instrument};

pub const DEFAULT_MAX_TEMPLATE_DATE: &str = "2021-11-03";
pub const FEATURES_FILE: &str = "features.pkl.gz";

const MODEL_COUNT: u32 = 5;
const PTM_SUFFIX: &str = "_ptm";
const MULTIMER_SUFFIX: &str = "_multimer";

/// Parses a comma-separated model selection into canonical model names.
///
/// Monomer runs accept `N` or `N_ptm`; multimer runs accept `N` or `N_multimer` and always
/// name models `N_multimer`. `N` must lie in `1..=5`.
pub fn parse_models(list: &str, mode: PredictionMode) -> Result<Vec<String>, PipelineError> {
    let models: Vec<String> = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| canonical_model_name(entry, mode))
        .collect::<Result<_, _>>()?;
    if models.is_empty() {
        return Err(PipelineError::InvalidModel {
            entry: list.to_string(),
            reason: "no models selected".to_string(),
        });
    }
    Ok(models)
}

pub fn default_models(mode: PredictionMode) -> Vec<String> {
    (1..=MODEL_COUNT)
        .map(|n| match mode {
            PredictionMode::Monomer => n.to_string(),
            PredictionMode::Multimer => format!("{}{}", n, MULTIMER_SUFFIX),
        })
        .collect()
}

fn canonical_model_name(entry: &str, mode: PredictionMode) -> Result<String, PipelineError> {
    let invalid = |reason: &str| PipelineError::InvalidModel {
        entry: entry.to_string(),
        reason: reason.to_string(),
    };
    let (number, suffix) = match mode {
        PredictionMode::Monomer => match entry.strip_suffix(PTM_SUFFIX) {
            Some(n) => (n, PTM_SUFFIX),
            None => (entry, ""),
        },
        PredictionMode::Multimer => (
            entry.strip_suffix(MULTIMER_SUFFIX).unwrap_or(entry),
            MULTIMER_SUFFIX,
        ),
    };
    let n: u32 = number
        .parse()
        .map_err(|_| invalid("expected a model number"))?;
    if !(1..=MODEL_COUNT).contains(&n) {
        return Err(invalid("model number must be between 1 and 5"));
    }
    Ok(format!("{}{}", n, suffix))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRequest {
    pub input_fasta: PathBuf,
    pub output_dir: PathBuf,
    pub mode: PredictionMode,
    /// Canonical model names, see [`parse_models`].
    pub models: Vec<String>,
    /// `YYYY-MM-DD`; templates released after this date are ignored.
    pub max_template_date: String,
    pub skip_refine: bool,
    pub is_prokaryote: bool,
}

impl PipelineRequest {
    pub fn new(input_fasta: PathBuf, output_dir: PathBuf, mode: PredictionMode) -> Self {
        Self {
            input_fasta,
            output_dir,
            mode,
            models: default_models(mode),
            max_template_date: DEFAULT_MAX_TEMPLATE_DATE.to_string(),
            skip_refine: false,
            is_prokaryote: false,
        }
    }

    fn output_file(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }

    pub fn features_path(&self) -> PathBuf {
        self.output_file(FEATURES_FILE)
    }

    pub fn result_bundle(&self, model: &str) -> PathBuf {
        self.output_file(&format!("result_model_{}.pkl.gz", model))
    }

    pub fn unrelaxed_structure(&self, model: &str) -> PathBuf {
        self.output_file(&format!("unrelaxed_model_{}.pdb", model))
    }

    pub fn relaxed_structure(&self, model: &str) -> PathBuf {
        self.output_file(&format!("relaxed_model_{}.pdb", model))
    }

    /// Non-pTM monomer heads produce no predicted aligned error.
    fn expects_error_matrices(&self) -> bool {
        match self.mode {
            PredictionMode::Monomer => self.models.iter().all(|m| m.ends_with(PTM_SUFFIX)),
            PredictionMode::Multimer => true,
        }
    }
}

/// A fully prepared external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(OsString, OsString)>,
}

impl Invocation {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub success: bool,
    pub code: Option<i32>,
}

impl ExitOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            code: Some(0),
        }
    }

    pub fn failure(code: i32) -> Self {
        Self {
            success: false,
            code: Some(code),
        }
    }
}

/// Runs external commands for the pipeline stages.
pub trait CommandRunner {
    /// Runs `invocation` to completion.
    ///
    /// # Errors
    ///
    /// Returns an error only if the process could not be started.
    fn run(&self, invocation: &Invocation) -> io::Result<ExitOutcome>;
}

/// Runs commands as child processes that inherit the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<ExitOutcome> {
        let status = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .status()?;
        Ok(ExitOutcome {
            success: status.success(),
            code: status.code(),
        })
    }
}

pub struct PipelineContext<'a> {
    pub request: &'a PipelineRequest,
    pub config: &'a PipelineConfig,
    pub resources: &'a ResolvedResources,
    pub runner: &'a dyn CommandRunner,
    pub reporter: &'a ProgressReporter<'a>,
}

impl PipelineContext<'_> {
    /// Builds an invocation of `spec` with `extra` arguments appended.
    ///
    /// The framework's source tree, when configured, is put in front of `PYTHONPATH`.
    pub fn invocation(&self, spec: &CommandSpec, extra: Vec<String>) -> Invocation {
        let mut env = Vec::new();
        if let Some(alphafold) = &self.resources.alphafold_path {
            let existing = env::var_os("PYTHONPATH");
            let paths = std::iter::once(alphafold.clone())
                .chain(existing.iter().flat_map(env::split_paths));
            if let Ok(joined) = env::join_paths(paths) {
                env.push((OsString::from("PYTHONPATH"), joined));
            }
        }
        Invocation {
            program: spec.program.clone(),
            args: spec.args.iter().cloned().chain(extra).collect(),
            env,
        }
    }

    /// Runs `invocation`, turning spawn failures and non-zero exits into errors.
    pub fn execute(&self, stage: &'static str, invocation: &Invocation) -> Result<(), PipelineError> {
        debug!(stage, command = %invocation.command_line(), "Running external command.");
        let outcome = self
            .runner
            .run(invocation)
            .map_err(|source| PipelineError::Spawn {
                stage,
                program: invocation.program.clone(),
                source,
            })?;
        if outcome.success {
            Ok(())
        } else {
            Err(PipelineError::StageFailed {
                stage,
                code: outcome.code,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    Completed,
    Skipped(String),
    Ranked(RankingReport),
}

pub trait Stage {
    fn name(&self) -> &'static str;
    fn run(&self, ctx: &PipelineContext) -> Result<StageOutput, PipelineError>;
}

/// Step 1: homolog and template search, producing `features.pkl.gz`.
pub struct SearchStage;

impl Stage for SearchStage {
    fn name(&self) -> &'static str {
        "search"
    }

    fn run(&self, ctx: &PipelineContext) -> Result<StageOutput, PipelineError> {
        let request = ctx.request;
        let features = request.features_path();
        if features.exists() {
            return Ok(StageOutput::Skipped(format!(
                "{} already exists",
                features.display()
            )));
        }

        let mut extra = vec![
            path_arg(&request.input_fasta),
            path_arg(&request.output_dir),
            "--max_template_date".to_string(),
            request.max_template_date.clone(),
        ];
        if request.is_prokaryote {
            extra.push("--is_prokaryote".to_string());
        }
        if ctx.config.commands.forward_resources {
            extra.extend(ctx.resources.search_flags());
        }
        let invocation = ctx.invocation(&ctx.config.commands.search, extra);
        ctx.execute(self.name(), &invocation)?;
        Ok(StageOutput::Completed)
    }
}

/// Step 2: model inference, producing unrelaxed structures and result bundles.
pub struct InferenceStage;

impl Stage for InferenceStage {
    fn name(&self) -> &'static str {
        "inference"
    }

    fn run(&self, ctx: &PipelineContext) -> Result<StageOutput, PipelineError> {
        let request = ctx.request;
        let mut extra = vec![
            path_arg(&request.features_path()),
            path_arg(&request.output_dir),
        ];
        if request.mode == PredictionMode::Monomer {
            extra.push("--models".to_string());
            extra.push(request.models.join(","));
        }
        let invocation = ctx.invocation(&ctx.config.commands.inference, extra);
        ctx.execute(self.name(), &invocation)?;
        Ok(StageOutput::Completed)
    }
}

/// Step 3: structure relaxation, one command per model.
pub struct RelaxStage;

impl Stage for RelaxStage {
    fn name(&self) -> &'static str {
        "relax"
    }

    fn run(&self, ctx: &PipelineContext) -> Result<StageOutput, PipelineError> {
        let request = ctx.request;
        if request.skip_refine {
            return Ok(StageOutput::Skipped("relaxation disabled".to_string()));
        }
        let spec = ctx
            .config
            .commands
            .relax
            .as_ref()
            .ok_or(PipelineError::MissingCommand { stage: self.name() })?;

        ctx.reporter.report(Progress::TaskStart {
            total_steps: request.models.len() as u64,
        });
        for model in &request.models {
            let relaxed = path_arg(&request.relaxed_structure(model));
            let extra = match request.mode {
                PredictionMode::Monomer => {
                    vec![path_arg(&request.unrelaxed_structure(model)), relaxed]
                }
                PredictionMode::Multimer => vec![
                    path_arg(&request.features_path()),
                    path_arg(&request.result_bundle(model)),
                    relaxed,
                ],
            };
            ctx.execute(self.name(), &ctx.invocation(spec, extra))?;
            ctx.reporter.report(Progress::TaskIncrement);
        }
        ctx.reporter.report(Progress::TaskFinish);
        Ok(StageOutput::Completed)
    }
}

/// Step 4: in-process ranking of the produced models.
pub struct RankStage;

impl Stage for RankStage {
    fn name(&self) -> &'static str {
        "rank"
    }

    fn run(&self, ctx: &PipelineContext) -> Result<StageOutput, PipelineError> {
        let request = ctx.request;
        let models: Vec<ModelArtifacts> = request
            .models
            .iter()
            .map(|model| {
                let structure = if request.skip_refine {
                    request.unrelaxed_structure(model)
                } else {
                    request.relaxed_structure(model)
                };
                ModelArtifacts::new(request.result_bundle(model), structure)
            })
            .collect();

        let ranking = RankingConfig {
            require_pae: ctx.config.ranking.require_pae && request.expects_error_matrices(),
            ..ctx.config.ranking.clone()
        };
        let report = rank::run(&models, &request.output_dir, &ranking, ctx.reporter)?;
        Ok(StageOutput::Ranked(report))
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub stages: Vec<(&'static str, StageOutput)>,
}

impl PipelineReport {
    pub fn ranking(&self) -> Option<&RankingReport> {
        self.stages.iter().find_map(|(_, output)| match output {
            StageOutput::Ranked(report) => Some(report),
            _ => None,
        })
    }
}

pub fn default_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(SearchStage),
        Box::new(InferenceStage),
        Box::new(RelaxStage),
        Box::new(RankStage),
    ]
}

/// Runs the full pipeline for `request`.
///
/// `resources` must come from validating `config` for `request.mode`.
#[instrument(skip_all, name = "prediction_pipeline", fields(mode = %request.mode))]
pub fn run(
    request: &PipelineRequest,
    config: &PipelineConfig,
    resources: &ResolvedResources,
    runner: &dyn CommandRunner,
    reporter: &ProgressReporter,
) -> Result<PipelineReport, PipelineError> {
    run_stages(&default_stages(), request, config, resources, runner, reporter)
}

pub fn run_stages(
    stages: &[Box<dyn Stage>],
    request: &PipelineRequest,
    config: &PipelineConfig,
    resources: &ResolvedResources,
    runner: &dyn CommandRunner,
    reporter: &ProgressReporter,
) -> Result<PipelineReport, PipelineError> {
    validate_request(request, config)?;
    if !request.output_dir.is_dir() {
        info!(path = %request.output_dir.display(), "Creating output directory.");
        fs::create_dir_all(&request.output_dir)?;
    }

    let ctx = PipelineContext {
        request,
        config,
        resources,
        runner,
        reporter,
    };

    let total = stages.len();
    let mut outputs = Vec::with_capacity(total);
    for (i, stage) in stages.iter().enumerate() {
        let name = stage.name();
        reporter.report(Progress::StageStart {
            name,
            index: i + 1,
            total,
        });
        info!("Step {}/{}: {}", i + 1, total, name);

        let output = stage.run(&ctx)?;
        let skipped = matches!(output, StageOutput::Skipped(_));
        if let StageOutput::Skipped(reason) = &output {
            info!(stage = name, "Skipped: {}", reason);
        }
        reporter.report(Progress::StageFinish { name, skipped });
        outputs.push((name, output));
    }

    info!("Pipeline finished.");
    Ok(PipelineReport { stages: outputs })
}

fn validate_request(request: &PipelineRequest, config: &PipelineConfig) -> Result<(), PipelineError> {
    if request.models.is_empty() {
        return Err(PipelineError::InvalidModel {
            entry: String::new(),
            reason: "no models selected".to_string(),
        });
    }
    for model in &request.models {
        let canonical = canonical_model_name(model, request.mode)?;
        if &canonical != model {
            return Err(PipelineError::InvalidModel {
                entry: model.clone(),
                reason: format!("expected canonical name '{}'", canonical),
            });
        }
    }
    if !request.input_fasta.is_file() {
        return Err(PipelineError::InvalidRequest(format!(
            "input FASTA {} does not exist",
            request.input_fasta.display()
        )));
    }
    if !request.skip_refine && config.commands.relax.is_none() {
        return Err(PipelineError::MissingCommand { stage: "relax" });
    }
    Ok(())
}
