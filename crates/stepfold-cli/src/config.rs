use crate::error::{CliError, Result};
use crate::utils::parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use stepfold::engine::config::{
    self as core_config, CommandSpec, DiagnosticsPolicy, PredictionMode, RankingConfig,
};
use tracing::debug;

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialAlphafoldConfig {
    path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialExecutables {
    jackhmmer: Option<PathBuf>,
    hhblits: Option<PathBuf>,
    hhsearch: Option<PathBuf>,
    hmmsearch: Option<PathBuf>,
    hmmbuild: Option<PathBuf>,
    kalign: Option<PathBuf>,
}

impl From<PartialExecutables> for core_config::ToolPaths {
    fn from(p: PartialExecutables) -> Self {
        Self {
            jackhmmer: p.jackhmmer,
            hhblits: p.hhblits,
            hhsearch: p.hhsearch,
            hmmsearch: p.hmmsearch,
            hmmbuild: p.hmmbuild,
            kalign: p.kalign,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialDatabases {
    uniref90: Option<PathBuf>,
    mgnify: Option<PathBuf>,
    template_mmcif_dir: Option<PathBuf>,
    obsolete_pdbs: Option<PathBuf>,
    bfd: Option<PathBuf>,
    #[serde(alias = "uniclust30")]
    uniref30: Option<PathBuf>,
    pdb70: Option<PathBuf>,
    uniprot: Option<PathBuf>,
    pdb_seqres: Option<PathBuf>,
}

impl From<PartialDatabases> for core_config::DatabasePaths {
    fn from(p: PartialDatabases) -> Self {
        Self {
            uniref90: p.uniref90,
            mgnify: p.mgnify,
            template_mmcif_dir: p.template_mmcif_dir,
            obsolete_pdbs: p.obsolete_pdbs,
            bfd: p.bfd,
            uniref30: p.uniref30,
            pdb70: p.pdb70,
            uniprot: p.uniprot,
            pdb_seqres: p.pdb_seqres,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialStepCommands {
    search: Option<Vec<String>>,
    inference: Option<Vec<String>>,
    relax: Option<Vec<String>>,
    forward_resources: Option<bool>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialSteps {
    monomer: Option<PartialStepCommands>,
    multimer: Option<PartialStepCommands>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
enum PartialDiagnostics {
    BestEffort,
    FailFast,
}

impl From<PartialDiagnostics> for DiagnosticsPolicy {
    fn from(p: PartialDiagnostics) -> Self {
        match p {
            PartialDiagnostics::BestEffort => DiagnosticsPolicy::BestEffort,
            PartialDiagnostics::FailFast => DiagnosticsPolicy::FailFast,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialRankingConfig {
    diagnostics: Option<PartialDiagnostics>,
    render_plots: Option<bool>,
    heatmap_max_cells: Option<usize>,
    require_pae: Option<bool>,
}

impl From<PartialRankingConfig> for RankingConfig {
    fn from(p: PartialRankingConfig) -> Self {
        let defaults = RankingConfig::default();
        Self {
            diagnostics: p.diagnostics.map(Into::into).unwrap_or(defaults.diagnostics),
            render_plots: p.render_plots.unwrap_or(defaults.render_plots),
            heatmap_max_cells: p.heatmap_max_cells.unwrap_or(defaults.heatmap_max_cells),
            require_pae: p.require_pae.unwrap_or(defaults.require_pae),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialPipelineConfig {
    alphafold: Option<PartialAlphafoldConfig>,
    executables: Option<PartialExecutables>,
    databases: Option<PartialDatabases>,
    steps: Option<PartialSteps>,
    ranking: Option<PartialRankingConfig>,
}

impl PartialPipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Applies `-S KEY=VALUE` overrides, then builds the configuration for `mode`.
    pub fn merge_with_cli(
        mut self,
        set_values: &[String],
        mode: PredictionMode,
    ) -> Result<core_config::PipelineConfig> {
        self.apply_set_values(set_values)?;

        let mut steps = self.steps.unwrap_or_default();
        let commands = match mode {
            PredictionMode::Monomer => steps.monomer.take(),
            PredictionMode::Multimer => steps.multimer.take(),
        }
        .ok_or_else(|| CliError::Config(format!("`steps.{}` section is required.", mode)))?;

        let command = |argv: Option<Vec<String>>, key: &str| -> Result<Option<CommandSpec>> {
            match argv {
                None => Ok(None),
                Some(argv) => CommandSpec::from_argv(argv).map(Some).ok_or_else(|| {
                    CliError::Config(format!("`steps.{}.{}` must not be empty.", mode, key))
                }),
            }
        };
        let search = command(commands.search, "search")?.ok_or_else(|| {
            CliError::Config(format!("`steps.{}.search` is required.", mode))
        })?;
        let inference = command(commands.inference, "inference")?.ok_or_else(|| {
            CliError::Config(format!("`steps.{}.inference` is required.", mode))
        })?;
        let relax = command(commands.relax, "relax")?;

        core_config::PipelineConfigBuilder::new()
            .alphafold_path(self.alphafold.and_then(|a| a.path))
            .tools(self.executables.unwrap_or_default().into())
            .databases(self.databases.unwrap_or_default().into())
            .search_command(search)
            .inference_command(inference)
            .relax_command(relax)
            .forward_resources(commands.forward_resources.unwrap_or(false))
            .ranking(self.ranking.unwrap_or_default().into())
            .build()
            .map_err(|e| CliError::Config(e.to_string()))
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let (key, value_str) = parser::split_key_value(kv_pair)?;
            let invalid = |kind: &str| {
                CliError::Config(format!("Invalid {} value for {}: {}", kind, key, value_str))
            };

            match key {
                "alphafold.path" => {
                    self.alphafold.get_or_insert_with(Default::default).path =
                        Some(PathBuf::from(value_str));
                }
                "ranking.diagnostics" => {
                    let policy = match value_str {
                        "best-effort" => PartialDiagnostics::BestEffort,
                        "fail-fast" => PartialDiagnostics::FailFast,
                        _ => return Err(invalid("policy")),
                    };
                    self.ranking.get_or_insert_with(Default::default).diagnostics = Some(policy);
                }
                "ranking.render-plots" => {
                    self.ranking.get_or_insert_with(Default::default).render_plots =
                        Some(value_str.parse().map_err(|_| invalid("boolean"))?);
                }
                "ranking.heatmap-max-cells" => {
                    self.ranking
                        .get_or_insert_with(Default::default)
                        .heatmap_max_cells =
                        Some(value_str.parse().map_err(|_| invalid("integer"))?);
                }
                "ranking.require-pae" => {
                    self.ranking.get_or_insert_with(Default::default).require_pae =
                        Some(value_str.parse().map_err(|_| invalid("boolean"))?);
                }
                _ => {
                    return Err(CliError::Config(format!(
                        "Unsupported configuration key for --set: '{}'",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}
