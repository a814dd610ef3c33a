use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_HEATMAP_MAX_CELLS: usize = 400;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredictionMode {
    Monomer,
    Multimer,
}

impl PredictionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PredictionMode::Monomer => "monomer",
            PredictionMode::Multimer => "multimer",
        }
    }
}

impl fmt::Display for PredictionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How plot rendering failures are treated by the ranker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiagnosticsPolicy {
    /// Log and record each failed plot, keep rendering the rest.
    #[default]
    BestEffort,
    /// Abort the run on the first failed plot.
    FailFast,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankingConfig {
    pub diagnostics: DiagnosticsPolicy,
    pub render_plots: bool,
    /// Largest heatmap side, in cells, drawn without block averaging.
    pub heatmap_max_cells: usize,
    /// Whether every bundle must carry a predicted aligned error matrix.
    pub require_pae: bool,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            diagnostics: DiagnosticsPolicy::default(),
            render_plots: true,
            heatmap_max_cells: DEFAULT_HEATMAP_MAX_CELLS,
            require_pae: true,
        }
    }
}

/// External executables used by the homolog and template search.
///
/// `None` means "look the tool up on `PATH`".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolPaths {
    pub jackhmmer: Option<PathBuf>,
    pub hhblits: Option<PathBuf>,
    pub hhsearch: Option<PathBuf>,
    pub hmmsearch: Option<PathBuf>,
    pub hmmbuild: Option<PathBuf>,
    pub kalign: Option<PathBuf>,
}

impl ToolPaths {
    /// `(executable name, configured path)` for every tool.
    pub fn entries(&self) -> [(&'static str, Option<&Path>); 6] {
        [
            ("jackhmmer", self.jackhmmer.as_deref()),
            ("hhblits", self.hhblits.as_deref()),
            ("hhsearch", self.hhsearch.as_deref()),
            ("hmmsearch", self.hmmsearch.as_deref()),
            ("hmmbuild", self.hmmbuild.as_deref()),
            ("kalign", self.kalign.as_deref()),
        ]
    }
}

/// A sequence or structure database and the flag the search step takes it under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseKind {
    pub name: &'static str,
    pub flag: &'static str,
}

pub const UNIREF90: DatabaseKind = DatabaseKind {
    name: "uniref90",
    flag: "uniref90_database_path",
};
pub const MGNIFY: DatabaseKind = DatabaseKind {
    name: "mgnify",
    flag: "mgnify_database_path",
};
pub const TEMPLATE_MMCIF_DIR: DatabaseKind = DatabaseKind {
    name: "template-mmcif-dir",
    flag: "template_mmcif_dir",
};
pub const OBSOLETE_PDBS: DatabaseKind = DatabaseKind {
    name: "obsolete-pdbs",
    flag: "obsolete_pdbs_path",
};
pub const BFD: DatabaseKind = DatabaseKind {
    name: "bfd",
    flag: "bfd_database_path",
};
/// AlphaFold v2.3 replaced UniClust30 with UniRef30 and renamed the flag from
/// `uniclust30_database_path`; earlier releases are not supported.
pub const UNIREF30: DatabaseKind = DatabaseKind {
    name: "uniref30",
    flag: "uniref30_database_path",
};
pub const PDB70: DatabaseKind = DatabaseKind {
    name: "pdb70",
    flag: "pdb70_database_path",
};
pub const UNIPROT: DatabaseKind = DatabaseKind {
    name: "uniprot",
    flag: "uniprot_database_path",
};
pub const PDB_SEQRES: DatabaseKind = DatabaseKind {
    name: "pdb-seqres",
    flag: "pdb_seqres_database_path",
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabasePaths {
    pub uniref90: Option<PathBuf>,
    pub mgnify: Option<PathBuf>,
    pub template_mmcif_dir: Option<PathBuf>,
    pub obsolete_pdbs: Option<PathBuf>,
    pub bfd: Option<PathBuf>,
    pub uniref30: Option<PathBuf>,
    pub pdb70: Option<PathBuf>,
    pub uniprot: Option<PathBuf>,
    pub pdb_seqres: Option<PathBuf>,
}

impl DatabasePaths {
    /// The databases the search step of `mode` reads, with their configured paths.
    pub fn required_for(&self, mode: PredictionMode) -> Vec<(DatabaseKind, Option<&Path>)> {
        let mut required = vec![
            (UNIREF90, self.uniref90.as_deref()),
            (MGNIFY, self.mgnify.as_deref()),
            (TEMPLATE_MMCIF_DIR, self.template_mmcif_dir.as_deref()),
            (OBSOLETE_PDBS, self.obsolete_pdbs.as_deref()),
            (BFD, self.bfd.as_deref()),
            (UNIREF30, self.uniref30.as_deref()),
        ];
        match mode {
            PredictionMode::Monomer => required.push((PDB70, self.pdb70.as_deref())),
            PredictionMode::Multimer => {
                required.push((UNIPROT, self.uniprot.as_deref()));
                required.push((PDB_SEQRES, self.pdb_seqres.as_deref()));
            }
        }
        required
    }
}

/// A program and its leading arguments, run without a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Splits an argument vector into program and arguments. Returns `None` when empty.
    pub fn from_argv(argv: Vec<String>) -> Option<Self> {
        let mut parts = argv.into_iter();
        let program = parts.next().filter(|p| !p.trim().is_empty())?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

/// The external commands behind the search, inference and relax stages of one mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommands {
    pub search: CommandSpec,
    pub inference: CommandSpec,
    /// Only needed when relaxation is not skipped.
    pub relax: Option<CommandSpec>,
    /// Pass every resolved executable and database to the search command as flags.
    pub forward_resources: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub alphafold_path: Option<PathBuf>,
    pub tools: ToolPaths,
    pub databases: DatabasePaths,
    pub commands: StageCommands,
    pub ranking: RankingConfig,
}

#[derive(Default)]
pub struct PipelineConfigBuilder {
    alphafold_path: Option<PathBuf>,
    tools: Option<ToolPaths>,
    databases: Option<DatabasePaths>,
    search_command: Option<CommandSpec>,
    inference_command: Option<CommandSpec>,
    relax_command: Option<CommandSpec>,
    forward_resources: Option<bool>,
    ranking: Option<RankingConfig>,
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alphafold_path(mut self, path: Option<PathBuf>) -> Self {
        self.alphafold_path = path;
        self
    }
    pub fn tools(mut self, tools: ToolPaths) -> Self {
        self.tools = Some(tools);
        self
    }
    pub fn databases(mut self, databases: DatabasePaths) -> Self {
        self.databases = Some(databases);
        self
    }
    pub fn search_command(mut self, command: CommandSpec) -> Self {
        self.search_command = Some(command);
        self
    }
    pub fn inference_command(mut self, command: CommandSpec) -> Self {
        self.inference_command = Some(command);
        self
    }
    pub fn relax_command(mut self, command: Option<CommandSpec>) -> Self {
        self.relax_command = command;
        self
    }
    pub fn forward_resources(mut self, forward: bool) -> Self {
        self.forward_resources = Some(forward);
        self
    }
    pub fn ranking(mut self, ranking: RankingConfig) -> Self {
        self.ranking = Some(ranking);
        self
    }

    pub fn build(self) -> Result<PipelineConfig, ConfigError> {
        let ranking = self.ranking.unwrap_or_default();
        if ranking.heatmap_max_cells == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "heatmap_max_cells",
                reason: "must be at least 1".to_string(),
            });
        }
        let commands = StageCommands {
            search: self
                .search_command
                .ok_or(ConfigError::MissingParameter("search_command"))?,
            inference: self
                .inference_command
                .ok_or(ConfigError::MissingParameter("inference_command"))?,
            relax: self.relax_command,
            forward_resources: self.forward_resources.unwrap_or(false),
        };
        Ok(PipelineConfig {
            alphafold_path: self.alphafold_path,
            tools: self.tools.unwrap_or_default(),
            databases: self.databases.unwrap_or_default(),
            commands,
            ranking,
        })
    }
}
