#![allow(clippy::disallowed_methods)]

use std::{fs, path::Path};

use amdpack::{Compiler, ModuleConfig};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const JSON_CONFIG: &str = r#"{
    "baseUrl": "src",
    "paths": {"tpl": "common/tpl"},
    "packages": [{"name": "er", "location": "../dep/er/src"}],
    "combine": {"app": {"include": ["er/**"], "exclude": ["er/controller"]}},
    "map": {"*": {"jquery": "vendor/jquery"}}
}"#;

const TOML_CONFIG: &str = r#"
baseUrl = "src"

[paths]
tpl = "common/tpl"

[[packages]]
name = "er"
location = "../dep/er/src"

[combine.app]
include = ["er/**"]
exclude = ["er/controller"]

[map."*"]
jquery = "vendor/jquery"
"#;

/// Project layout with a module config and sources on disk
fn write_project(config_name: &str, config: &str) -> TempDir {
    let _ = env_logger::builder().is_test(true).try_init();

    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();

    fs::write(root.join(config_name), config).unwrap();

    let files = [
        ("src/app.js", "define(['er', 'tpl', 'jquery'], function () {});"),
        ("src/common/tpl.js", "define(function () { return 'tpl'; });"),
        ("src/vendor/jquery.js", "define(function () { return 'jquery'; });"),
        ("src/readme.txt", "not a module"),
        ("dep/er/src/main.js", "define(['./View', './controller'], function () {});"),
        ("dep/er/src/View.js", "define(function () { return 'View'; });"),
        ("dep/er/src/controller.js", "define(function () { return 'controller'; });"),
    ];
    for (path, contents) in files {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    temp_dir
}

/// Register every file under `root` the way a build driver would
fn compiler_for(root: &Path, config_name: &str) -> Compiler {
    let config = ModuleConfig::from_path(&root.join(config_name)).unwrap();
    let mut compiler = Compiler::new(config);

    let mut pending = vec![root.to_path_buf()];
    let mut files = Vec::new();
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    // Stable registration order regardless of directory listing order
    files.sort();

    for path in files {
        let relative = path.strip_prefix(root).unwrap();
        let contents = fs::read(&path).unwrap();
        compiler.register_file(relative, contents);
    }
    compiler
}

fn assert_project_bundles(config_name: &str, config: &str) {
    let project = write_project(config_name, config);
    let compiler = compiler_for(project.path(), config_name);

    let registry = compiler.registry();
    for id in ["app", "tpl", "common/tpl", "er", "er/main", "er/View", "vendor/jquery"] {
        assert!(registry.contains(id), "{id} should be registered");
    }
    assert_eq!(
        registry.alias_group("common/tpl").unwrap(),
        &["tpl".to_string(), "common/tpl".to_string()]
    );

    assert_eq!(compiler.combined_modules(), vec!["app"]);

    let output = compiler.to_bundle("app").unwrap();
    let expected = [
        "define('er/View', [], function () { return 'View'; });",
        "define('er/main', ['./View', './controller'], function () {});",
        "define('er', ['er/main'], function (main) { return main; });",
        "define('tpl', [], function () { return 'tpl'; });",
        "\n/** d e f i n e */\ndefine('common/tpl', ['tpl'], function (target) { return target; });",
        "define('vendor/jquery', [], function () { return 'jquery'; });",
        "define('app', ['er', 'tpl', 'jquery'], function () {});",
    ]
    .join("\n\n");
    assert_eq!(output, expected);
}

#[test]
fn test_json_config_file() {
    assert_project_bundles("module.conf", JSON_CONFIG);
}

#[test]
fn test_toml_config_file() {
    assert_project_bundles("module.toml", TOML_CONFIG);
}

#[test]
fn test_register_file_ignores_non_modules() {
    let project = write_project("module.conf", JSON_CONFIG);
    let config = ModuleConfig::from_path(&project.path().join("module.conf")).unwrap();
    let mut compiler = Compiler::new(config);

    let ids = compiler.register_file(Path::new("src/readme.txt"), "not a module");
    assert!(ids.is_empty());
    assert!(compiler.registry().is_empty());

    let ids = compiler.register_file(Path::new("dep/er/src/main.js"), "define({});");
    assert_eq!(ids, vec!["er", "er/main"]);
}

#[test]
fn test_config_errors_carry_context() {
    let temp_dir = TempDir::new().unwrap();

    let missing = ModuleConfig::from_path(&temp_dir.path().join("module.conf")).unwrap_err();
    assert!(
        missing.to_string().contains("Failed to read module config"),
        "unexpected error: {missing:#}"
    );

    let broken_path = temp_dir.path().join("broken.conf");
    fs::write(&broken_path, "{\"combine\": ").unwrap();
    let broken = ModuleConfig::from_path(&broken_path).unwrap_err();
    assert!(broken.to_string().contains("Invalid module config"));
    assert!(format!("{broken:#}").contains("Failed to parse module config as JSON"));
}
