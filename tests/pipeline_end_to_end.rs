use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use runtime_packager::filesystem::{sha256_file, tree_digest};
use runtime_packager::{ImageDescriptor, ModuleGraph, PackagingConfig, Pipeline, Stage};
use tempfile::TempDir;

const CUSTOM_CORE: &str = "#!/bin/sh\n# hand-written launcher\nexec java -m core/core.Main \"$@\"\n";

struct Project {
    temp: TempDir,
}

impl Project {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        component(root, "java.base", "21", &[], &[("bin/java", "#!/bin/sh\n"), ("lib/libjava.so", "java")]);
        component(root, "java.logging", "21", &["java.base"], &[("lib/liblogging.so", "logging")]);
        component(root, "compression-support", "1", &["java.base"], &[("lib/libzip.so", "zip")]);
        component(root, "ansi-console", "2", &[], &[("lib/libansi.so", "ansi")]);

        write(root, "modules/core/core/Main.class", "core main");
        write(root, "modules/core/core/messages.properties", "greeting=core");
        write(root, "modules/lsp-server/lsp/Main.class", "lsp main");
        write(root, "modules/lsp-server/core/messages.properties", "greeting=lsp");
        write(
            root,
            "modules.json",
            r#"{ "modules": [
  { "name": "core", "artifact": "modules/core", "requires": ["java.base"] },
  { "name": "lsp-server", "artifact": "modules/lsp-server",
    "dependencies": [{ "name": "core" }], "requires": ["java.logging"] }
] }"#,
        );
        write(root, "scripts/core.sh", CUSTOM_CORE);

        Self { temp }
    }

    fn root(&self) -> &Path {
        self.temp.path()
    }

    fn image_root(&self) -> PathBuf {
        self.root().join("build/image")
    }

    fn configure(&self, body: &str) -> PackagingConfig {
        let path = self.root().join("package.toml");
        fs::write(&path, body).unwrap();
        PackagingConfig::load(&path).unwrap()
    }

    fn run(&self, config: &PackagingConfig) -> Result<(), runtime_packager::StageError> {
        let graph = ModuleGraph::load(&config.module_graph).unwrap();
        Pipeline::new(config, &graph).run().map(|_| ())
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn component(root: &Path, name: &str, version: &str, requires: &[&str], files: &[(&str, &str)]) {
    let requires = requires
        .iter()
        .map(|r| format!("\"{r}\""))
        .collect::<Vec<_>>()
        .join(", ");
    write(
        root,
        &format!("platform/{name}/component.toml"),
        &format!("version = \"{version}\"\nrequires = [{requires}]\n"),
    );
    for (rel, content) in files {
        write(root, &format!("platform/{name}/{rel}"), content);
    }
}

fn config_text(capabilities: &[&str], extend: bool, secondary_name: &str, tail: &str) -> String {
    let capabilities = capabilities
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"
capabilities = [{capabilities}]

[image]
name = "core"
module_graph = "modules.json"
extend = {extend}

[primary]
module = "core"
entry = "core.Main"

[[secondary]]
name = "{secondary_name}"
module = "lsp-server"
entry = "lsp.Main"
flags = ["--enable-preview"]

[optimization]
strip_debug = true
compress_level = 2

[linker]
platform = "platform"
{tail}
"#
    )
}

const CORE_OVERLAY: &str = r#"
[[overlay]]
source = "scripts/core.sh"
destination = "bin/core"
executable = true
"#;

#[test]
fn test_core_and_lsp_image() {
    let project = Project::new();
    let config = project.configure(&config_text(
        &["compression-support"],
        false,
        "core-lsp",
        CORE_OVERLAY,
    ));
    let graph = ModuleGraph::load(&config.module_graph).unwrap();

    let report = Pipeline::new(&config, &graph).run().unwrap();

    let image = project.image_root();
    assert_eq!(report.image.root, image);
    assert_eq!(fs::read_to_string(image.join("bin/core")).unwrap(), CUSTOM_CORE);
    let lsp = fs::read_to_string(image.join("bin/core-lsp")).unwrap();
    assert!(lsp.contains("-m lsp-server/lsp.Main"));
    assert!(lsp.contains("--enable-preview"));
    assert!(image.join("bin/core.bat").is_file());
    assert!(image.join("bin/core-lsp.bat").is_file());
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(image.join("bin/core")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    // Only what the modules and capabilities need.
    assert!(image.join("lib/libzip.so").is_file());
    assert!(image.join("lib/liblogging.so").is_file());
    assert!(!image.join("lib/libansi.so").exists());
    assert!(image.join("lib/modules").is_file());

    let descriptor = ImageDescriptor::read(&image).unwrap().unwrap();
    assert_eq!(descriptor.capabilities.version_of("compression-support"), Some("1"));
    let names: Vec<_> = descriptor.launchers.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, vec!["core", "core-lsp"]);

    let artifacts: Vec<_> = report.artifacts.iter().map(|a| a.module.as_str()).collect();
    assert_eq!(artifacts, vec!["core", "lsp-server"]);
    assert!(project.root().join("build/libs/core-all.tar").is_file());
    assert!(project.root().join("build/libs/core-all.tar.sha256").is_file());
    assert_eq!(
        report.stages,
        vec![
            Stage::Prepare,
            Stage::Aggregate,
            Stage::Link,
            Stage::RegisterLaunchers,
            Stage::Materialize,
            Stage::OverlayScripts,
        ]
    );

    let manifest: serde_json::Value = serde_json::from_slice(
        &fs::read(project.root().join("build/run-manifest.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(manifest["status"], "success");
}

#[test]
fn test_rerun_is_deterministic() {
    let project = Project::new();
    let config = project.configure(&config_text(&[], false, "core-lsp", CORE_OVERLAY));

    project.run(&config).unwrap();
    let artifact = project.root().join("build/libs/lsp-server-all.tar");
    let (first_sha, _) = sha256_file(&artifact).unwrap();
    let first_image = tree_digest(&project.image_root()).unwrap();

    project.run(&config).unwrap();
    assert_eq!(sha256_file(&artifact).unwrap().0, first_sha);
    assert_eq!(tree_digest(&project.image_root()).unwrap(), first_image);
}

#[test]
fn test_without_destination_nothing_is_written_outside_output() {
    let project = Project::new();
    let config = project.configure(&config_text(&[], false, "core-lsp", CORE_OVERLAY));
    let inputs = ["platform", "modules", "scripts"];
    let before: Vec<String> = inputs
        .iter()
        .map(|dir| tree_digest(&project.root().join(dir)).unwrap())
        .collect();
    let top_level = |root: &Path| -> BTreeSet<String> {
        fs::read_dir(root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    };
    let mut expected = top_level(project.root());
    expected.insert("build".to_string());

    let graph = ModuleGraph::load(&config.module_graph).unwrap();
    let pipeline = Pipeline::new(&config, &graph);
    assert!(!pipeline.stages().contains(&Stage::Deploy));
    let report = pipeline.run().unwrap();

    assert!(report.deployed_to.is_none());
    assert_eq!(top_level(project.root()), expected);
    let after: Vec<String> = inputs
        .iter()
        .map(|dir| tree_digest(&project.root().join(dir)).unwrap())
        .collect();
    assert_eq!(before, after);
    let build: BTreeSet<String> = top_level(&project.root().join("build"))
        .into_iter()
        .filter(|name| !name.starts_with(".runtime-packager.lock"))
        .collect();
    assert_eq!(
        build,
        ["image", "libs", "run-manifest.json"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    );
}

#[test]
fn test_deploys_to_destination() {
    let project = Project::new();
    let tail = format!("{CORE_OVERLAY}\n[install]\ndestination = \"dist/core\"\n");
    let config = project.configure(&config_text(&[], false, "core-lsp", &tail));
    let graph = ModuleGraph::load(&config.module_graph).unwrap();

    let report = Pipeline::new(&config, &graph).run().unwrap();

    let dest = project.root().join("dist/core");
    assert_eq!(report.deployed_to.as_deref(), Some(dest.as_path()));
    assert_eq!(report.stages.last(), Some(&Stage::Deploy));
    assert_eq!(
        tree_digest(&dest).unwrap(),
        tree_digest(&project.image_root()).unwrap()
    );
}

#[test]
fn test_deploy_onto_file_fails() {
    let project = Project::new();
    write(project.root(), "dist", "occupied");
    let tail = "\n[install]\ndestination = \"dist\"\n";
    let config = project.configure(&config_text(&[], false, "core-lsp", tail));

    let err = project.run(&config).unwrap_err();
    assert_eq!(err.stage, Stage::Deploy);
    assert_eq!(err.kind(), "DeploymentError");
}

#[test]
fn test_duplicate_launcher_name_fails_before_materialization() {
    let project = Project::new();
    let config = project.configure(&config_text(&[], false, "core", ""));

    let err = project.run(&config).unwrap_err();

    assert_eq!(err.stage, Stage::RegisterLaunchers);
    assert_eq!(err.kind(), "LauncherConflictError");
    assert!(!project.image_root().exists());
}

#[test]
fn test_launcher_named_after_runtime_binary_fails() {
    let project = Project::new();
    let config = project.configure(&config_text(&[], false, "java", ""));

    let err = project.run(&config).unwrap_err();

    assert_eq!(err.stage, Stage::Materialize);
    assert_eq!(err.kind(), "LauncherConflictError");
    assert!(err.to_string().contains("bin/java"));
    assert!(!project.image_root().exists());
}

#[test]
fn test_unknown_capability_is_link_error() {
    let project = Project::new();
    let config = project.configure(&config_text(&["no-such-thing"], false, "core-lsp", ""));

    let err = project.run(&config).unwrap_err();
    assert_eq!(err.stage, Stage::Link);
    assert_eq!(err.kind(), "LinkError");
    assert!(err.to_string().contains("no-such-thing"));
}

#[test]
fn test_failed_overlay_discards_image() {
    let project = Project::new();
    let tail = r#"
[[overlay]]
source = "scripts/core.sh"
destination = "bin/core"
executable = true

[[overlay]]
source = "scripts/missing.sh"
destination = "bin/core-lsp"
executable = true
"#;
    let config = project.configure(&config_text(&[], false, "core-lsp", tail));

    let err = project.run(&config).unwrap_err();

    assert_eq!(err.stage, Stage::OverlayScripts);
    assert_eq!(err.kind(), "ScriptOverlayError");
    assert!(!project.image_root().exists());
    let manifest: serde_json::Value = serde_json::from_slice(
        &fs::read(project.root().join("build/run-manifest.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(manifest["failure"]["stage"], "overlay-scripts");
}

fn extend_in_order(order: &[&[&str]]) -> ImageDescriptor {
    let project = Project::new();
    for capabilities in order {
        let config = project.configure(&config_text(capabilities, true, "core-lsp", ""));
        project.run(&config).unwrap();
    }
    ImageDescriptor::read(&project.image_root()).unwrap().unwrap()
}

#[test]
fn test_capability_merge_is_commutative_across_runs() {
    let a: &[&str] = &["compression-support"];
    let b: &[&str] = &["ansi-console"];

    let ab = extend_in_order(&[a, b]);
    let ba = extend_in_order(&[b, a]);
    let union = extend_in_order(&[&["ansi-console", "compression-support"]]);

    assert_eq!(ab.capabilities, ba.capabilities);
    assert_eq!(ab.capabilities, union.capabilities);
    assert_eq!(ab.platform_components, union.platform_components);
    assert!(ab.capabilities.contains("compression-support"));
    assert!(ab.capabilities.contains("ansi-console"));
}

#[test]
fn test_extend_never_drops_capabilities() {
    let project = Project::new();
    let config = project.configure(&config_text(&["compression-support"], true, "core-lsp", ""));
    project.run(&config).unwrap();

    let config = project.configure(&config_text(&[], true, "core-lsp", ""));
    project.run(&config).unwrap();

    let image = project.image_root();
    let descriptor = ImageDescriptor::read(&image).unwrap().unwrap();
    assert!(descriptor.capabilities.contains("compression-support"));
    assert!(image.join("lib/libzip.so").is_file());
}
