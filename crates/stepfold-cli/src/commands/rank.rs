use crate::cli::RankArgs;
use crate::error::{CliError, Result};
use crate::utils::{parser, progress::CliProgressHandler};
use stepfold::{
    core::models::artifacts::ModelArtifacts,
    engine::{
        config::{DiagnosticsPolicy, RankingConfig},
        progress::ProgressReporter,
    },
    workflows::{
        self,
        rank::{RankedModel, RankingReport},
    },
};
use tracing::{info, warn};

pub fn run(args: RankArgs) -> Result<()> {
    let bundles = parser::parse_path_list(&args.bundles, "bundle")?;
    let structures = parser::parse_path_list(&args.structures, "structure")?;
    let models = ModelArtifacts::pair(bundles, structures)?;
    let config = ranking_config(&args)?;

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!("Ranking {} model(s)...", models.len());
    info!("Invoking the ranking workflow...");
    let report = workflows::rank::run(&models, &args.output_dir, &config, &reporter)?;

    print_report(&report);
    Ok(())
}

fn ranking_config(args: &RankArgs) -> Result<RankingConfig> {
    let mut config = RankingConfig {
        render_plots: !args.no_plots,
        require_pae: !args.optional_pae,
        ..RankingConfig::default()
    };
    if args.strict_plots {
        config.diagnostics = DiagnosticsPolicy::FailFast;
    }
    if let Some(cells) = args.heatmap_max_cells {
        if cells == 0 {
            return Err(CliError::Config(
                "`--heatmap-max-cells` must be at least 1.".to_string(),
            ));
        }
        config.heatmap_max_cells = cells;
    }
    Ok(config)
}

pub fn print_report(report: &RankingReport) {
    for entry in &report.entries {
        println!("{}", entry_line(entry));
    }
    println!("Manifest written to: {}", report.manifest_path.display());

    if !report.plots.is_empty() {
        println!("{} diagnostic plot(s) written.", report.plots.len());
    }
    for failure in &report.plot_failures {
        warn!(
            "Plot for {} was not written to {}: {}",
            failure.model_id,
            failure.path.display(),
            failure.message
        );
        println!(
            "Warning: plot {} could not be rendered: {}",
            failure.path.display(),
            failure.message
        );
    }
}

fn entry_line(entry: &RankedModel) -> String {
    let marker = if entry.rank == 1 { "✓" } else { " " };
    let plddt = entry
        .mean_plddt
        .map(|p| format!(", mean pLDDT {:.2}", p))
        .unwrap_or_default();
    format!(
        "{} ranked_{}: {} (confidence {:.4}{}) -> {}",
        marker,
        entry.rank,
        entry.model_id,
        entry.ranking_confidence,
        plddt,
        entry.ranked_path.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use std::fs;
    use std::path::Path;

    fn rank_args(extra: &[&str]) -> RankArgs {
        let mut argv = vec!["stepfold", "rank", "a.json", "a.pdb", "out"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Commands::Rank(args) => args,
            _ => panic!("Expected 'rank' subcommand"),
        }
    }

    fn write_bundle(path: &Path, confidence: f64) {
        let content = format!(
            r#"{{"ranking_confidence": {confidence}, "plddt": [70.0, 80.0, 90.0],
                "predicted_aligned_error": [[0, 1, 2], [1, 0, 1], [2, 1, 0]]}}"#
        );
        fs::write(path, content).unwrap();
    }

    #[test]
    fn flags_map_to_ranking_config() {
        let config = ranking_config(&rank_args(&[])).unwrap();
        assert_eq!(config, RankingConfig::default());

        let config = ranking_config(&rank_args(&[
            "--strict-plots",
            "--optional-pae",
            "--heatmap-max-cells",
            "50",
        ]))
        .unwrap();
        assert_eq!(config.diagnostics, DiagnosticsPolicy::FailFast);
        assert!(!config.require_pae);
        assert_eq!(config.heatmap_max_cells, 50);

        assert!(!ranking_config(&rank_args(&["--no-plots"])).unwrap().render_plots);
        assert!(ranking_config(&rank_args(&["--heatmap-max-cells", "0"])).is_err());
    }

    #[test]
    fn entry_line_shows_confidence_and_mean_plddt() {
        let mut entry = RankedModel {
            rank: 1,
            model_id: "model_2".to_string(),
            ranking_confidence: 0.875,
            ptm: None,
            iptm: None,
            mean_plddt: Some(80.0),
            source: "relaxed_model_2.pdb".into(),
            ranked_path: "out/ranked_1.pdb".into(),
        };
        assert_eq!(
            entry_line(&entry),
            "✓ ranked_1: model_2 (confidence 0.8750, mean pLDDT 80.00) -> out/ranked_1.pdb"
        );

        entry.rank = 2;
        entry.mean_plddt = None;
        assert_eq!(
            entry_line(&entry),
            "  ranked_2: model_2 (confidence 0.8750) -> out/ranked_1.pdb"
        );
    }

    #[test]
    fn ranks_json_bundles_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        let names = ["result_model_1.json", "result_model_2.json"];
        write_bundle(&dir.path().join(names[0]), 71.5);
        write_bundle(&dir.path().join(names[1]), 88.0);
        fs::write(dir.path().join("model_1.pdb"), "ATOM 1\n").unwrap();
        fs::write(dir.path().join("model_2.pdb"), "ATOM 2\n").unwrap();

        let list = |files: [&str; 2]| {
            files
                .iter()
                .map(|f| dir.path().join(f).display().to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        let args = RankArgs {
            bundles: list(names),
            structures: list(["model_1.pdb", "model_2.pdb"]),
            output_dir: out.clone(),
            no_plots: true,
            strict_plots: false,
            heatmap_max_cells: None,
            optional_pae: false,
        };

        run(args).unwrap();

        assert_eq!(fs::read_to_string(out.join("ranked_1.pdb")).unwrap(), "ATOM 2\n");
        assert_eq!(fs::read_to_string(out.join("ranked_2.pdb")).unwrap(), "ATOM 1\n");
        let manifest = fs::read_to_string(out.join("ranking_debug.json")).unwrap();
        assert!(manifest.contains("\"model_2\""));
    }

    #[test]
    fn mismatched_lists_are_rejected_before_ranking() {
        let dir = tempfile::tempdir().unwrap();
        let args = RankArgs {
            bundles: "a.json,b.json".to_string(),
            structures: "a.pdb".to_string(),
            output_dir: dir.path().to_path_buf(),
            no_plots: true,
            strict_plots: false,
            heatmap_max_cells: None,
            optional_pae: false,
        };
        let err = run(args).unwrap_err();
        assert!(matches!(
            err,
            CliError::Ranking(stepfold::engine::error::RankError::LengthMismatch { .. })
        ));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
