use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "stepfold - rank, report and orchestrate AlphaFold2 and AlphaFold-Multimer predictions.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rank finished predictions and write ranked structures, the manifest and plots.
    Rank(RankArgs),
    /// Run search, inference, relaxation and ranking for one input sequence.
    Run(RunArgs),
    /// Validate a configuration file and print every resolved executable and database.
    Check(CheckArgs),
}

/// Arguments for the `rank` subcommand.
#[derive(Args, Debug)]
pub struct RankArgs {
    /// Comma-separated result bundles (e.g., result_model_1.pkl.gz,result_model_2.pkl.gz).
    #[arg(value_name = "BUNDLES")]
    pub bundles: String,

    /// Comma-separated structure files, paired with the bundles by position.
    #[arg(value_name = "STRUCTURES")]
    pub structures: String,

    /// Existing directory that receives the ranked files.
    #[arg(value_name = "OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Skip the per-model diagnostic plots.
    #[arg(long)]
    pub no_plots: bool,

    /// Abort on the first plot that fails to render instead of logging it.
    #[arg(long, conflicts_with = "no_plots")]
    pub strict_plots: bool,

    /// Largest heatmap side drawn without block averaging.
    #[arg(long, value_name = "INT")]
    pub heatmap_max_cells: Option<usize>,

    /// Accept bundles without a predicted aligned error matrix.
    #[arg(long)]
    pub optional_pae: bool,
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Input sequence(s) in FASTA format.
    #[arg(value_name = "INPUT_FASTA")]
    pub input_fasta: PathBuf,

    /// Directory for features, models and ranked outputs; created if missing.
    #[arg(value_name = "OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Path to the pipeline configuration file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub config: PathBuf,

    /// Predict a complex with AlphaFold-Multimer.
    #[arg(long)]
    pub multimer: bool,

    /// Comma-separated models to run (e.g., '1,2,3' or '1_ptm,2_ptm'). Defaults to all five.
    #[arg(long, value_name = "LIST")]
    pub models: Option<String>,

    /// Ignore templates released after this date (YYYY-MM-DD).
    #[arg(long, value_name = "DATE")]
    pub max_template_date: Option<String>,

    /// Skip structure relaxation and rank the unrelaxed models.
    #[arg(long)]
    pub skip_refine: bool,

    /// Treat all chains as prokaryotic when pairing MSAs.
    #[arg(long)]
    pub is_prokaryote: bool,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S ranking.render-plots=false
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `check` subcommand.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Path to the pipeline configuration file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub config: PathBuf,

    /// Check the resources needed by AlphaFold-Multimer.
    #[arg(long)]
    pub multimer: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_arguments_parse() {
        let cli = Cli::parse_from([
            "stepfold",
            "-vv",
            "rank",
            "a.pkl.gz,b.pkl.gz",
            "a.pdb,b.pdb",
            "out",
            "--strict-plots",
            "--heatmap-max-cells",
            "200",
        ]);
        assert_eq!(cli.verbose, 2);
        let Commands::Rank(args) = cli.command else {
            panic!("Expected 'rank' subcommand");
        };
        assert_eq!(args.bundles, "a.pkl.gz,b.pkl.gz");
        assert_eq!(args.output_dir, PathBuf::from("out"));
        assert!(args.strict_plots);
        assert_eq!(args.heatmap_max_cells, Some(200));
        assert!(!args.optional_pae);
    }

    #[test]
    fn run_arguments_parse_with_set_values() {
        let cli = Cli::parse_from([
            "stepfold",
            "run",
            "query.fasta",
            "out",
            "-c",
            "stepfold.toml",
            "--multimer",
            "--models",
            "1,2",
            "-S",
            "ranking.render-plots=false",
            "--log-file",
            "run.log",
        ]);
        assert_eq!(cli.log_file, Some(PathBuf::from("run.log")));
        let Commands::Run(args) = cli.command else {
            panic!("Expected 'run' subcommand");
        };
        assert!(args.multimer);
        assert_eq!(args.models.as_deref(), Some("1,2"));
        assert_eq!(args.set_values, vec!["ranking.render-plots=false"]);
    }

    #[test]
    fn conflicting_flags_are_rejected() {
        assert!(Cli::try_parse_from(["stepfold", "-q", "-v", "check", "-c", "x.toml"]).is_err());
        assert!(
            Cli::try_parse_from(["stepfold", "rank", "a", "b", "c", "--no-plots", "--strict-plots"])
                .is_err()
        );
        assert!(Cli::try_parse_from(["stepfold", "check"]).is_err());
    }
}
