// tests/lifecycle.rs
//! End-to-end lifecycle coverage over the public API: source listings,
//! dependency planning, install, load state, persistence, and removal.

use git2::{Repository, Signature};
use grove::{Config, Manager};
use std::path::Path;

fn commit_all(repo: &Repository, message: &str) {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();

    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = Signature::now("tester", "tester@localhost").unwrap();
    let parent = repo
        .head()
        .ok()
        .and_then(|head| head.peel_to_commit().ok());
    let parents: Vec<_> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap();
}

fn init_repo(dir: &Path, files: &[(&str, &str)]) -> Repository {
    std::fs::create_dir_all(dir).unwrap();
    let repo = Repository::init(dir).unwrap();

    for (name, content) in files {
        std::fs::write(dir.join(name), content).unwrap();
    }

    commit_all(&repo, "initial");
    repo
}

fn tag_head(repo: &Repository, name: &str) {
    let head = repo.head().unwrap().peel_to_commit().unwrap();
    repo.tag_lightweight(name, head.as_object(), false).unwrap();
}

fn make_package(root: &Path, name: &str, metadata: &str, tag: Option<&str>) -> String {
    let dir = root.join(name);
    let repo = init_repo(
        &dir,
        &[("grove.meta", metadata), ("__load__.gv", "# entry\n")],
    );

    if let Some(tag) = tag {
        tag_head(&repo, tag);
    }

    dir.to_string_lossy().into_owned()
}

fn make_source(root: &Path, name: &str, package_urls: &[&str]) -> String {
    let dir = root.join(name);
    let mut listing = String::from("# package listing\n");
    for url in package_urls {
        listing.push_str(url);
        listing.push('\n');
    }

    init_repo(&dir, &[("grove.index", &listing)]);
    dir.to_string_lossy().into_owned()
}

fn config_for(state: &Path, source_url: Option<&str>) -> Config {
    let mut config = Config::default();
    config.paths.state_dir = state.to_path_buf();

    if let Some(url) = source_url {
        config.sources.insert("pkgs".to_string(), url.to_string());
    }

    config
}

#[test]
fn install_plan_load_and_remove() {
    let upstream = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();

    let bar = make_package(upstream.path(), "bar", "[package]\n", Some("v2.0.0"));
    let foo = make_package(
        upstream.path(),
        "foo",
        "[package]\ndepends = bar *\n",
        Some("v1.0.0"),
    );
    let source = make_source(upstream.path(), "registry", &[&foo, &bar]);

    let config = config_for(state.path(), Some(&source));
    let mut manager = Manager::new(&config).unwrap();

    // Both packages are visible through the source by short name.
    assert_eq!(manager.match_source_packages("foo").unwrap().len(), 1);
    assert_eq!(manager.match_source_packages("bar").unwrap().len(), 1);

    // Installing foo needs bar.
    let plan = manager
        .validate_dependencies(&[("foo".to_string(), String::new())], false, false)
        .unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].info.package.name, "bar");
    assert_eq!(plan[0].version, "v2.0.0");

    for entry in plan.iter().rev() {
        manager
            .install(&entry.info.package.qualified_name(), &entry.version)
            .unwrap();
    }
    let installed = manager.install("foo", "").unwrap();
    assert_eq!(installed.status.current_version, "v1.0.0");

    // With everything installed the plan collapses to nothing.
    let plan = manager
        .validate_dependencies(&[("foo".to_string(), String::new())], false, false)
        .unwrap();
    assert!(plan.is_empty());

    // Loading foo pulls bar in first.
    let loaded = manager.load_with_dependencies("foo").unwrap();
    assert_eq!(loaded, vec!["bar".to_string(), "foo".to_string()]);

    let autoloader = config.script_dir().join("packages").join("packages.load");
    let listing = std::fs::read_to_string(&autoloader).unwrap();
    assert!(listing.contains("@load ./foo"));
    assert!(listing.contains("@load ./bar"));

    // bar stays loaded while foo needs it.
    assert!(manager.unload_with_unused_dependers("bar").is_err());

    // Unloading foo releases bar too.
    let unloaded = manager.unload_with_unused_dependers("foo").unwrap();
    assert_eq!(unloaded, vec!["bar".to_string(), "foo".to_string()]);

    manager.remove("foo").unwrap();
    assert!(manager.find_installed_package("foo").is_none());
    assert!(manager.find_installed_package("bar").is_some());
}

#[test]
fn manifest_state_survives_restart() {
    let upstream = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();

    let foo = make_package(upstream.path(), "foo", "[package]\n", Some("v1.0.0"));
    let config = config_for(state.path(), None);

    {
        let mut manager = Manager::new(&config).unwrap();
        manager.install(&foo, "").unwrap();
        manager.load("foo").unwrap();
        manager.pin("foo").unwrap();
    }

    let manager = Manager::new(&config).unwrap();
    let ipkg = manager.find_installed_package("foo").unwrap();
    assert_eq!(ipkg.status.current_version, "v1.0.0");
    assert!(ipkg.status.is_loaded);
    assert!(ipkg.status.is_pinned);
}

#[test]
fn install_by_url_without_sources() {
    let upstream = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();

    let foo = make_package(upstream.path(), "foo", "[package]\n", None);
    let config = config_for(state.path(), None);
    let mut manager = Manager::new(&config).unwrap();

    // A short name resolves nowhere without a source.
    assert!(manager.install("foo", "").is_err());

    // The full path installs and tracks the default branch.
    let ipkg = manager.install(&foo, "").unwrap();
    assert!(ipkg.status.tracking_method.is_some());
    assert!(manager.find_installed_package("foo").is_some());
}
