//! Artifact aggregation.
//!
//! Flattens one module and its transitive runtime dependencies into a
//! single deployable archive (`<output>/libs/<module>-all.tar`).
//!
//! Inputs are applied in a fixed total order: the runtime dependencies in
//! breadth-first declaration order, then the module's own output. When two
//! inputs contribute the same relative path the later one wins silently.

pub(crate) mod tarball;

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::PackagingConfig;
use crate::error::{PackagingError, Result};
use crate::filesystem::{atomic_rename, sha256_file, tmp_name};
use crate::graph::{Module, ModuleGraph};
use tarball::{collect_dir, collect_tar, write_tar_file, EntryMap, EntrySource, TarEntry, FILE_MODE};

/// Manifest entry carrying the aggregated module's entry point.
pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

/// A merged archive produced by [`Aggregator::aggregate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub module: String,
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
    pub entries: usize,
    /// Contributing modules in processing order.
    pub inputs: Vec<String>,
}

pub struct Aggregator<'a> {
    graph: &'a ModuleGraph,
    output_dir: PathBuf,
}

impl<'a> Aggregator<'a> {
    pub fn new(config: &PackagingConfig, graph: &'a ModuleGraph) -> Self {
        Self {
            graph,
            output_dir: config.artifact_dir(),
        }
    }

    pub fn artifact_path(&self, module: &str) -> PathBuf {
        self.output_dir.join(format!("{module}-all.tar"))
    }

    /// Merge `module` with its runtime closure. `main_entry`, when given,
    /// is written into the archive manifest.
    pub fn aggregate(&self, module: &str, main_entry: Option<&str>) -> Result<Artifact> {
        let closure = self.graph.runtime_closure(module).map_err(|e| {
            PackagingError::aggregation(
                module,
                self.artifact_path(module),
                format!("unresolved dependency: {e}"),
            )
        })?;

        // Dependencies first, the module's own output last.
        let mut ordered: Vec<&Module> = closure.iter().skip(1).copied().collect();
        ordered.push(closure[0]);

        let mut entries = EntryMap::new();
        for input in &ordered {
            for (rel, entry) in read_input(module, input)? {
                if let Some(previous) = entries.insert(rel.clone(), entry) {
                    debug!(
                        "{}: '{}' from '{}' replaced by '{}'",
                        module, rel, previous.origin, input.name
                    );
                }
            }
        }

        if let Some(entry) = main_entry {
            entries.insert(
                MANIFEST_PATH.to_string(),
                TarEntry {
                    source: EntrySource::Bytes(render_manifest(module, entry).into_bytes()),
                    mode: FILE_MODE,
                    origin: module.to_string(),
                },
            );
        }

        let path = self.artifact_path(module);
        fs::create_dir_all(&self.output_dir).map_err(|e| {
            PackagingError::aggregation_io(module, &self.output_dir, "creating artifact dir", e)
        })?;
        let tmp = self.output_dir.join(tmp_name(&format!("{module}-all")));
        write_tar_file(&tmp, &entries, 0).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            PackagingError::aggregation_io(module, &tmp, "writing artifact", e)
        })?;
        atomic_rename(&tmp, &path)
            .map_err(|e| PackagingError::aggregation_io(module, &path, "moving artifact", e))?;

        let (sha256, size_bytes) = sha256_file(&path)
            .map_err(|e| PackagingError::aggregation_io(module, &path, "hashing artifact", e))?;
        write_checksum(&path, &sha256)
            .map_err(|e| PackagingError::aggregation_io(module, &path, "writing checksum", e))?;

        info!(
            "aggregated '{}' ({} entries from {} inputs) -> {}",
            module,
            entries.len(),
            ordered.len(),
            path.display()
        );

        Ok(Artifact {
            module: module.to_string(),
            path,
            sha256,
            size_bytes,
            entries: entries.len(),
            inputs: ordered.iter().map(|m| m.name.clone()).collect(),
        })
    }
}

fn read_input(aggregated: &str, input: &Module) -> Result<Vec<(String, TarEntry)>> {
    let path = &input.artifact;
    let metadata = fs::metadata(path).map_err(|e| {
        PackagingError::aggregation_io(
            aggregated,
            path,
            format!("artifact of dependency '{}' is missing", input.name),
            e,
        )
    })?;
    let collected = if metadata.is_dir() {
        collect_dir(path, &input.name)
    } else {
        collect_tar(path, &input.name)
    };
    collected.map_err(|e| {
        PackagingError::aggregation_io(
            aggregated,
            path,
            format!("artifact of dependency '{}' is unreadable", input.name),
            e,
        )
    })
}

fn render_manifest(module: &str, entry: &str) -> String {
    format!("Manifest-Version: 1.0\nCreated-By: runtime-packager\nImplementation-Title: {module}\nMain-Class: {entry}\n\n")
}

fn write_checksum(artifact: &Path, sha256: &str) -> std::io::Result<()> {
    let name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut sidecar = artifact.as_os_str().to_owned();
    sidecar.push(".sha256");
    fs::write(PathBuf::from(sidecar), format!("{sha256}  {name}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Dependency, DependencyScope};
    use std::fs::File;
    use std::io::Read;
    use tempfile::TempDir;

    fn module(temp: &Path, name: &str, deps: &[&str], files: &[(&str, &str)]) -> Module {
        let dir = temp.join("modules").join(name);
        for (rel, content) in files {
            let path = dir.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        fs::create_dir_all(&dir).unwrap();
        Module {
            name: name.to_string(),
            artifact: dir,
            dependencies: deps
                .iter()
                .map(|d| Dependency {
                    name: d.to_string(),
                    scope: DependencyScope::Runtime,
                })
                .collect(),
            requires: Vec::new(),
        }
    }

    fn aggregator<'a>(temp: &Path, graph: &'a ModuleGraph) -> Aggregator<'a> {
        Aggregator {
            graph,
            output_dir: temp.join("build/libs"),
        }
    }

    fn read_entry(archive: &Path, wanted: &str) -> Option<String> {
        let mut archive = tar::Archive::new(File::open(archive).unwrap());
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.path().unwrap().to_string_lossy() == wanted {
                let mut s = String::new();
                entry.read_to_string(&mut s).unwrap();
                return Some(s);
            }
        }
        None
    }

    #[test]
    fn test_flattens_closure_with_last_writer_wins() {
        let temp = TempDir::new().unwrap();
        let graph = ModuleGraph::from_modules(vec![
            module(
                temp.path(),
                "core",
                &["gson", "jline"],
                &[("core/Main.class", "main"), ("shared.properties", "core")],
            ),
            module(
                temp.path(),
                "gson",
                &[],
                &[("gson/Gson.class", "gson"), ("LICENSE", "gson")],
            ),
            module(
                temp.path(),
                "jline",
                &[],
                &[("jline/Term.class", "jline"), ("LICENSE", "jline"), ("shared.properties", "jline")],
            ),
        ])
        .unwrap();

        let artifact = aggregator(temp.path(), &graph)
            .aggregate("core", Some("core.Main"))
            .unwrap();

        assert_eq!(artifact.inputs, vec!["gson", "jline", "core"]);
        assert_eq!(read_entry(&artifact.path, "LICENSE").unwrap(), "jline");
        assert_eq!(read_entry(&artifact.path, "shared.properties").unwrap(), "core");
        assert_eq!(read_entry(&artifact.path, "gson/Gson.class").unwrap(), "gson");
        assert!(read_entry(&artifact.path, MANIFEST_PATH)
            .unwrap()
            .contains("Main-Class: core.Main"));
        assert!(artifact.path.with_extension("tar.sha256").exists());
    }

    #[test]
    fn test_rerun_is_byte_identical() {
        let temp = TempDir::new().unwrap();
        let graph = ModuleGraph::from_modules(vec![
            module(temp.path(), "core", &["gson"], &[("a/A.class", "a"), ("b/B.class", "b")]),
            module(temp.path(), "gson", &[], &[("g/G.class", "g")]),
        ])
        .unwrap();
        let agg = aggregator(temp.path(), &graph);

        let first = agg.aggregate("core", None).unwrap();
        let first_bytes = fs::read(&first.path).unwrap();
        let second = agg.aggregate("core", None).unwrap();
        let second_bytes = fs::read(&second.path).unwrap();

        assert_eq!(first.sha256, second.sha256);
        assert_eq!(first_bytes, second_bytes);
    }

    #[test]
    fn test_tar_inputs_are_merged() {
        let temp = TempDir::new().unwrap();
        let lib_src = module(temp.path(), "lib-src", &[], &[("lib/L.class", "lib")]);
        let graph_src = ModuleGraph::from_modules(vec![lib_src]).unwrap();
        let packed = aggregator(temp.path(), &graph_src)
            .aggregate("lib-src", None)
            .unwrap();

        let mut lib = module(temp.path(), "lib", &[], &[]);
        lib.artifact = packed.path.clone();
        let graph = ModuleGraph::from_modules(vec![
            module(temp.path(), "core", &["lib"], &[("core/Main.class", "main")]),
            lib,
        ])
        .unwrap();
        let artifact = aggregator(temp.path(), &graph).aggregate("core", None).unwrap();
        assert_eq!(read_entry(&artifact.path, "lib/L.class").unwrap(), "lib");
    }

    #[test]
    fn test_missing_dependency_artifact_fails() {
        let temp = TempDir::new().unwrap();
        let mut gson = module(temp.path(), "gson", &[], &[]);
        gson.artifact = temp.path().join("does-not-exist");
        let graph = ModuleGraph::from_modules(vec![
            module(temp.path(), "core", &["gson"], &[("core/Main.class", "main")]),
            gson,
        ])
        .unwrap();

        let err = aggregator(temp.path(), &graph)
            .aggregate("core", None)
            .unwrap_err();
        assert_eq!(err.kind(), "AggregationError");
        assert!(err.to_string().contains("does-not-exist"));
    }

    #[test]
    fn test_undeclared_dependency_fails() {
        let temp = TempDir::new().unwrap();
        let graph = ModuleGraph::from_modules(vec![module(
            temp.path(),
            "core",
            &["ghost"],
            &[("core/Main.class", "main")],
        )])
        .unwrap();
        let err = aggregator(temp.path(), &graph)
            .aggregate("core", None)
            .unwrap_err();
        assert_eq!(err.kind(), "AggregationError");
    }
}
