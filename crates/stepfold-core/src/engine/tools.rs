//! Resolution of the external executables and databases the search stage depends on.

use super::config::{DatabaseKind, PipelineConfig, PredictionMode};
use super::error::ConfigurationError;
use std::env;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Suffix of the index files that stand in for an HH-suite database prefix.
const HHSUITE_INDEX_SUFFIX: &str = "_a3m.ffdata";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResources {
    pub alphafold_path: Option<PathBuf>,
    pub executables: Vec<(&'static str, PathBuf)>,
    pub databases: Vec<(DatabaseKind, PathBuf)>,
}

impl ResolvedResources {
    /// Command-line flags handing every resolved path to the search step,
    /// e.g. `--jackhmmer_binary_path=/usr/bin/jackhmmer`.
    pub fn search_flags(&self) -> Vec<String> {
        let tools = self
            .executables
            .iter()
            .map(|(name, path)| format!("--{}_binary_path={}", name, path.display()));
        let dbs = self
            .databases
            .iter()
            .map(|(kind, path)| format!("--{}={}", kind.flag, path.display()));
        tools.chain(dbs).collect()
    }
}

/// Checks every executable and database needed by `mode`.
///
/// All problems are collected and reported together. `search_path` is the value of `PATH`
/// used for executables without a configured location.
pub fn resolve_resources(
    config: &PipelineConfig,
    mode: PredictionMode,
    search_path: Option<&OsStr>,
) -> Result<ResolvedResources, ConfigurationError> {
    let mut problems = Vec::new();

    if let Some(path) = &config.alphafold_path {
        if !path.is_dir() {
            problems.push(format!("alphafold path {} is not a directory", path.display()));
        }
    }

    let mut executables = Vec::new();
    for (name, configured) in config.tools.entries() {
        match resolve_executable(name, configured, search_path) {
            Ok(path) => {
                debug!(tool = name, path = %path.display(), "Resolved executable.");
                executables.push((name, path));
            }
            Err(problem) => problems.push(problem),
        }
    }

    let mut databases = Vec::new();
    for (kind, configured) in config.databases.required_for(mode) {
        match resolve_database(kind, configured) {
            Ok(path) => databases.push((kind, path)),
            Err(problem) => problems.push(problem),
        }
    }

    if !problems.is_empty() {
        return Err(ConfigurationError { problems });
    }
    Ok(ResolvedResources {
        alphafold_path: config.alphafold_path.clone(),
        executables,
        databases,
    })
}

/// The process `PATH`, for callers that resolve against the real environment.
pub fn system_search_path() -> Option<OsString> {
    env::var_os("PATH")
}

fn resolve_executable(
    name: &str,
    configured: Option<&Path>,
    search_path: Option<&OsStr>,
) -> Result<PathBuf, String> {
    match configured.filter(|p| !p.as_os_str().is_empty()) {
        Some(path) if path.exists() => Ok(path.to_path_buf()),
        Some(path) => Err(format!("{} executable {} does not exist", name, path.display())),
        None => find_in_path(name, search_path)
            .ok_or_else(|| format!("{} was not found on PATH", name)),
    }
}

fn resolve_database(kind: DatabaseKind, configured: Option<&Path>) -> Result<PathBuf, String> {
    let Some(path) = configured.filter(|p| !p.as_os_str().is_empty()) else {
        return Err(format!("{} database path is not configured", kind.name));
    };
    if path.exists() || hhsuite_index(path).exists() {
        Ok(path.to_path_buf())
    } else {
        Err(format!("{} database {} does not exist", kind.name, path.display()))
    }
}

fn hhsuite_index(prefix: &Path) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(HHSUITE_INDEX_SUFFIX);
    PathBuf::from(name)
}

/// Looks `name` up in the directories of `search_path`, like `which`.
pub fn find_in_path(name: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    env::split_paths(search_path?)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::{
        CommandSpec, DatabasePaths, PipelineConfigBuilder, ToolPaths,
    };
    use std::fs;
    use tempfile::{TempDir, tempdir};

    const TOOLS: [&str; 6] = ["jackhmmer", "hhblits", "hhsearch", "hmmsearch", "hmmbuild", "kalign"];

    fn fake_bin_dir() -> TempDir {
        let dir = tempdir().unwrap();
        for tool in TOOLS {
            let path = dir.path().join(tool);
            fs::write(&path, "#!/bin/sh\n").unwrap();
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            }
        }
        dir
    }

    fn databases(root: &Path) -> DatabasePaths {
        let file = |name: &str| {
            let path = root.join(name);
            fs::write(&path, "").unwrap();
            Some(path)
        };
        DatabasePaths {
            uniref90: file("uniref90.fasta"),
            mgnify: file("mgy_clusters.fa"),
            template_mmcif_dir: Some(root.to_path_buf()),
            obsolete_pdbs: file("obsolete.dat"),
            // HH-suite databases are given as prefixes.
            bfd: {
                fs::write(root.join("bfd_a3m.ffdata"), "").unwrap();
                Some(root.join("bfd"))
            },
            uniref30: file("uniref30"),
            pdb70: file("pdb70"),
            uniprot: None,
            pdb_seqres: None,
        }
    }

    fn config(tools: ToolPaths, databases: DatabasePaths) -> PipelineConfig {
        PipelineConfigBuilder::new()
            .tools(tools)
            .databases(databases)
            .search_command(CommandSpec::from_argv(vec!["search".into()]).unwrap())
            .inference_command(CommandSpec::from_argv(vec!["infer".into()]).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn resolves_tools_on_path_and_hhsuite_prefixes() {
        let bin = fake_bin_dir();
        let data = tempdir().unwrap();
        let cfg = config(ToolPaths::default(), databases(data.path()));

        let resolved =
            resolve_resources(&cfg, PredictionMode::Monomer, Some(bin.path().as_os_str()))
                .unwrap();
        assert_eq!(resolved.executables.len(), 6);
        assert_eq!(resolved.executables[0].1, bin.path().join("jackhmmer"));
        assert!(
            resolved
                .databases
                .iter()
                .any(|(kind, path)| kind.name == "bfd" && *path == data.path().join("bfd"))
        );
    }

    #[test]
    fn reports_every_problem_at_once() {
        let data = tempdir().unwrap();
        let tools = ToolPaths {
            kalign: Some(PathBuf::from("/definitely/not/kalign")),
            ..ToolPaths::default()
        };
        let cfg = config(tools, databases(data.path()));

        let err = resolve_resources(&cfg, PredictionMode::Multimer, None).unwrap_err();
        // Five tools missing from PATH, one bad configured tool, two unset databases.
        assert_eq!(err.problems.len(), 8);
        assert!(err.problems.iter().any(|p| p.contains("/definitely/not/kalign")));
        assert!(err.problems.iter().any(|p| p.contains("uniprot")));
        assert!(err.to_string().contains("pdb-seqres"));
    }

    #[test]
    fn configured_tool_path_takes_precedence() {
        let bin = fake_bin_dir();
        let data = tempdir().unwrap();
        let tools = ToolPaths {
            jackhmmer: Some(bin.path().join("kalign")),
            ..ToolPaths::default()
        };
        let cfg = config(tools, databases(data.path()));
        let resolved =
            resolve_resources(&cfg, PredictionMode::Monomer, Some(bin.path().as_os_str()))
                .unwrap();
        assert_eq!(resolved.executables[0], ("jackhmmer", bin.path().join("kalign")));
    }

    #[test]
    fn search_flags_use_framework_flag_names() {
        let resolved = ResolvedResources {
            alphafold_path: None,
            executables: vec![("jackhmmer", PathBuf::from("/bin/jackhmmer"))],
            databases: vec![(
                crate::engine::config::OBSOLETE_PDBS,
                PathBuf::from("/db/obsolete.dat"),
            )],
        };
        assert_eq!(
            resolved.search_flags(),
            vec![
                "--jackhmmer_binary_path=/bin/jackhmmer",
                "--obsolete_pdbs_path=/db/obsolete.dat"
            ]
        );
    }

    #[test]
    fn find_in_path_skips_missing_entries() {
        let bin = fake_bin_dir();
        let joined = env::join_paths([Path::new("/nonexistent"), bin.path()]).unwrap();
        assert_eq!(
            find_in_path("hhblits", Some(joined.as_os_str())),
            Some(bin.path().join("hhblits"))
        );
        assert_eq!(find_in_path("nope", Some(joined.as_os_str())), None);
        assert_eq!(find_in_path("hhblits", None), None);
    }
}
