use crate::core::io::bundle::load_model_result;
use crate::core::io::manifest::{MANIFEST_FILE_NAME, RankingManifest};
use crate::core::models::artifacts::{
    ModelArtifacts, ranked_file_name, structure_extension, unique_model_ids,
};
use crate::core::models::result::ModelResult;
use crate::core::plots::{self, PlotError, heatmap, plddt};
use crate::core::ranking::rank_order;
use crate::engine::config::{DiagnosticsPolicy, RankingConfig};
use crate::engine::error::RankError;
use crate::engine::progress::{Progress, ProgressReporter};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// One model's place in the final ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedModel {
    /// 1 for the most confident model.
    pub rank: usize,
    pub model_id: String,
    pub ranking_confidence: f64,
    pub ptm: Option<f64>,
    pub iptm: Option<f64>,
    pub mean_plddt: Option<f64>,
    pub source: PathBuf,
    pub ranked_path: PathBuf,
}

/// A diagnostic plot that could not be rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotFailure {
    pub model_id: String,
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankingReport {
    /// Best model first.
    pub entries: Vec<RankedModel>,
    pub manifest_path: PathBuf,
    pub plots: Vec<PathBuf>,
    pub plot_failures: Vec<PlotFailure>,
}

impl RankingReport {
    pub fn best(&self) -> Option<&RankedModel> {
        self.entries.first()
    }
}

/// Ranks predicted models by confidence and writes the ranked copies, the ranking manifest
/// and per-model diagnostic plots into `output_dir`.
///
/// Inputs are validated before any bundle is read. `output_dir` must already exist.
#[instrument(skip_all, name = "ranking_workflow", fields(models = models.len()))]
pub fn run(
    models: &[ModelArtifacts],
    output_dir: &Path,
    config: &RankingConfig,
    reporter: &ProgressReporter,
) -> Result<RankingReport, RankError> {
    // === Phase 1: Validate inputs ===
    validate(models, output_dir)?;

    // === Phase 2: Load confidence metrics ===
    let results = load_results(models, config, reporter)?;

    // === Phase 3: Rank ===
    let scores: Vec<f64> = results.iter().map(|r| r.ranking_confidence).collect();
    let order = rank_order(&scores);
    info!(
        best = %results[order[0]].model_id,
        confidence = results[order[0]].ranking_confidence,
        "Models ranked."
    );

    // === Phase 4: Copy structures by rank ===
    let entries = materialize(&results, &order, output_dir, reporter)?;

    // === Phase 5: Ranking manifest ===
    let manifest_path = output_dir.join(MANIFEST_FILE_NAME);
    RankingManifest::new(&results, &order)
        .write(&manifest_path)
        .map_err(|source| RankError::Manifest {
            path: manifest_path.clone(),
            source,
        })?;
    info!(path = %manifest_path.display(), "Ranking manifest written.");

    // === Phase 6: Diagnostic plots ===
    let (plots, plot_failures) = if config.render_plots {
        render_diagnostics(&results, &order, output_dir, config, reporter)?
    } else {
        debug!("Plot rendering disabled.");
        (Vec::new(), Vec::new())
    };

    Ok(RankingReport {
        entries,
        manifest_path,
        plots,
        plot_failures,
    })
}

fn validate(models: &[ModelArtifacts], output_dir: &Path) -> Result<(), RankError> {
    if models.is_empty() {
        return Err(RankError::NoModels);
    }
    if !output_dir.is_dir() {
        return Err(RankError::OutputDirectory {
            path: output_dir.to_path_buf(),
        });
    }

    // A structure already sitting at a ranked_<r> destination would be truncated by a copy.
    let Ok(output_dir) = fs::canonicalize(output_dir) else {
        return Ok(());
    };
    for model in models {
        let Ok(source) = fs::canonicalize(&model.structure) else {
            continue;
        };
        let extension = structure_extension(&model.structure);
        let overlaps = (1..=models.len())
            .any(|rank| output_dir.join(ranked_file_name(rank, extension)) == source);
        if overlaps {
            return Err(RankError::OverlappingArtifact {
                path: model.structure.clone(),
            });
        }
    }
    Ok(())
}

fn load_results(
    models: &[ModelArtifacts],
    config: &RankingConfig,
    reporter: &ProgressReporter,
) -> Result<Vec<ModelResult>, RankError> {
    reporter.report(Progress::PhaseStart {
        name: "Loading Results",
    });
    reporter.report(Progress::TaskStart {
        total_steps: models.len() as u64,
    });

    let ids = unique_model_ids(models);
    let mut results = Vec::with_capacity(models.len());
    for (model, id) in models.iter().zip(ids) {
        if id != model.model_id() {
            info!(
                bundle = %model.bundle.display(),
                id = %id,
                "Bundle name already in use; model renamed."
            );
        }
        let result = load_model_result(model, id, config.require_pae)?;
        debug!(
            model = %result.model_id,
            confidence = result.ranking_confidence,
            residues = result.residue_count(),
            "Loaded result bundle."
        );
        results.push(result);
        reporter.report(Progress::TaskIncrement);
    }

    reporter.report(Progress::TaskFinish);
    reporter.report(Progress::PhaseFinish);
    Ok(results)
}

fn materialize(
    results: &[ModelResult],
    order: &[usize],
    output_dir: &Path,
    reporter: &ProgressReporter,
) -> Result<Vec<RankedModel>, RankError> {
    reporter.phase("Copying Structures", || {
        order
            .iter()
            .enumerate()
            .map(|(position, &index)| {
                let result = &results[index];
                let rank = position + 1;
                let extension = structure_extension(&result.structure);
                let ranked_path = output_dir.join(ranked_file_name(rank, extension));
                fs::copy(&result.structure, &ranked_path).map_err(|source| {
                    RankError::ArtifactCopy {
                        from: result.structure.clone(),
                        to: ranked_path.clone(),
                        source,
                    }
                })?;
                debug!(
                    rank,
                    model = %result.model_id,
                    to = %ranked_path.display(),
                    "Copied structure."
                );
                Ok(RankedModel {
                    rank,
                    model_id: result.model_id.clone(),
                    ranking_confidence: result.ranking_confidence,
                    ptm: result.ptm,
                    iptm: result.iptm,
                    mean_plddt: result.mean_plddt(),
                    source: result.structure.clone(),
                    ranked_path,
                })
            })
            .collect()
    })
}

fn render_diagnostics(
    results: &[ModelResult],
    order: &[usize],
    output_dir: &Path,
    config: &RankingConfig,
    reporter: &ProgressReporter,
) -> Result<(Vec<PathBuf>, Vec<PlotFailure>), RankError> {
    reporter.report(Progress::PhaseStart {
        name: "Rendering Plots",
    });
    reporter.report(Progress::TaskStart {
        total_steps: order.len() as u64,
    });

    let mut written = Vec::new();
    let mut failures = Vec::new();
    let mut record = |model_id: &str, path: PathBuf, outcome: Result<(), PlotError>| {
        match outcome {
            Ok(()) => {
                written.push(path);
                Ok(())
            }
            Err(err) => match config.diagnostics {
                DiagnosticsPolicy::FailFast => Err(RankError::PlotRender {
                    path,
                    message: err.to_string(),
                }),
                DiagnosticsPolicy::BestEffort => {
                    warn!(model = model_id, path = %path.display(), "Plot skipped: {}", err);
                    failures.push(PlotFailure {
                        model_id: model_id.to_string(),
                        path,
                        message: err.to_string(),
                    });
                    Ok(())
                }
            },
        }
    };

    for (position, &index) in order.iter().enumerate() {
        let result = &results[index];
        let title = plots::plot_title(&result.model_id, position + 1);

        match &result.predicted_aligned_error {
            Some(pae) => {
                let path = output_dir.join(plots::pae_file_name(&result.model_id));
                let outcome =
                    heatmap::render_pae_heatmap(&path, pae, &title, config.heatmap_max_cells);
                record(&result.model_id, path, outcome)?;
            }
            None => debug!(model = %result.model_id, "No error matrix; heatmap skipped."),
        }

        let path = output_dir.join(plots::plddt_file_name(&result.model_id));
        let outcome = plddt::render_plddt_chart(&path, &result.plddt, &title);
        record(&result.model_id, path, outcome)?;

        reporter.report(Progress::TaskIncrement);
    }

    reporter.report(Progress::TaskFinish);
    reporter.report(Progress::PhaseFinish);
    Ok((written, failures))
}
