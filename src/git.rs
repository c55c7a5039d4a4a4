// src/git.rs

//! Thin wrappers over `git2` for the clone/checkout/fetch operations the
//! package lifecycle needs.
//!
//! All package and source content moves through git. Clones are shallow
//! where the transport allows it; local-path URLs fall back to full
//! clones since the local transport does not support depth.

use crate::error::Result;
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{BranchType, FetchOptions, ObjectType, Repository};
use std::path::Path;
use tracing::debug;

const SHALLOW_DEPTH: i32 = 1;

/// Whether a URL refers to the local filesystem rather than a remote.
pub fn is_local_url(url: &str) -> bool {
    url.starts_with('/')
        || url.starts_with('.')
        || url.starts_with('~')
        || url.starts_with("file://")
}

/// Clone `url` into `target`. Shallow when requested and the transport
/// supports it. The origin URL is pinned to `url` afterwards so later
/// fetches use exactly what the caller asked for.
pub fn clone(url: &str, target: &Path, shallow: bool) -> Result<Repository> {
    debug!(url, target = %target.display(), shallow, "cloning");

    let mut fetch_options = FetchOptions::new();

    if shallow && !is_local_url(url) {
        fetch_options.depth(SHALLOW_DEPTH);
    }

    fetch_options.download_tags(git2::AutotagOption::All);

    let repo = RepoBuilder::new()
        .fetch_options(fetch_options)
        .clone(url, target)?;

    repo.remote_set_url("origin", url)?;
    Ok(repo)
}

/// Open an existing clone.
pub fn open(path: &Path) -> Result<Repository> {
    Ok(Repository::open(path)?)
}

/// The configured URL of the `origin` remote.
pub fn remote_url(repo: &Repository) -> Result<String> {
    let remote = repo.find_remote("origin")?;
    Ok(remote.url().unwrap_or_default().to_string())
}

/// Point the `origin` remote at a different URL.
pub fn set_remote_url(repo: &Repository, url: &str) -> Result<()> {
    repo.remote_set_url("origin", url)?;
    Ok(())
}

/// Fetch everything from `origin`, tags included.
pub fn fetch(repo: &Repository) -> Result<()> {
    let mut remote = repo.find_remote("origin")?;
    let mut options = FetchOptions::new();
    options.download_tags(git2::AutotagOption::All);

    let refspecs: Vec<String> = remote
        .fetch_refspecs()?
        .iter()
        .flatten()
        .map(str::to_string)
        .collect();

    remote.fetch(&refspecs, Some(&mut options), None)?;
    Ok(())
}

/// Check out `revision`, which may be a tag, a branch name, or a commit
/// hash. Branches get a local tracking branch; tags and commits leave
/// HEAD detached. Submodules are synced and updated afterwards.
pub fn checkout(repo: &Repository, revision: &str) -> Result<()> {
    debug!(revision, "checking out");

    let mut builder = CheckoutBuilder::new();
    builder.force();

    if let Ok(branch) = repo
        .find_branch(revision, BranchType::Local)
        .or_else(|_| local_branch_from_remote(repo, revision))
    {
        let refname = branch
            .get()
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("refs/heads/{revision}"));
        let object = branch.get().peel(ObjectType::Commit)?;
        repo.checkout_tree(&object, Some(&mut builder))?;
        repo.set_head(&refname)?;
    } else {
        let (object, _) = repo.revparse_ext(revision)?;
        repo.checkout_tree(&object, Some(&mut builder))?;
        repo.set_head_detached(object.id())?;
    }

    update_submodules(repo)?;
    Ok(())
}

fn local_branch_from_remote<'a>(
    repo: &'a Repository,
    name: &str,
) -> std::result::Result<git2::Branch<'a>, git2::Error> {
    let remote_branch = repo.find_branch(&format!("origin/{name}"), BranchType::Remote)?;
    let commit = remote_branch.get().peel_to_commit()?;
    let mut branch = repo.branch(name, &commit, false)?;
    branch.set_upstream(Some(&format!("origin/{name}")))?;
    Ok(branch)
}

fn update_submodules(repo: &Repository) -> Result<()> {
    for mut submodule in repo.submodules()? {
        submodule.sync()?;
        submodule.update(true, None)?;
    }

    Ok(())
}

/// Fetch from origin and fast-forward the current branch to its remote
/// counterpart.
pub fn pull(repo: &Repository) -> Result<()> {
    fetch(repo)?;

    let head = repo.head()?;

    let Some(branch_name) = head.shorthand().map(str::to_string) else {
        // Detached HEAD; nothing to fast-forward.
        return Ok(());
    };

    let remote_branch = match repo.find_branch(&format!("origin/{branch_name}"), BranchType::Remote)
    {
        Ok(branch) => branch,
        Err(_) => return Ok(()),
    };

    let target = remote_branch.get().peel_to_commit()?.id();
    let mut reference = repo.find_reference(&format!("refs/heads/{branch_name}"))?;
    reference.set_target(target, "fast-forward")?;
    repo.set_head(&format!("refs/heads/{branch_name}"))?;
    repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
    update_submodules(repo)?;
    Ok(())
}

/// All tag names in the repository.
pub fn tag_names(repo: &Repository) -> Result<Vec<String>> {
    let tags = repo.tag_names(None)?;
    Ok(tags.iter().flatten().map(str::to_string).collect())
}

/// Names of the branches on `origin`, without the remote prefix.
pub fn remote_branch_names(repo: &Repository) -> Result<Vec<String>> {
    let mut names = Vec::new();

    for branch in repo.branches(Some(BranchType::Remote))? {
        let (branch, _) = branch?;

        if let Some(name) = branch.name()? {
            if let Some(short) = name.strip_prefix("origin/") {
                if short != "HEAD" {
                    names.push(short.to_string());
                }
            }
        }
    }

    Ok(names)
}

/// The branch a fresh clone of this repository would check out:
/// origin's HEAD when known, else "main" or "master" when present, else
/// the currently checked-out branch.
pub fn default_branch(repo: &Repository) -> Result<String> {
    if let Ok(reference) = repo.find_reference("refs/remotes/origin/HEAD") {
        if let Some(target) = reference.symbolic_target() {
            if let Some(name) = target.strip_prefix("refs/remotes/origin/") {
                return Ok(name.to_string());
            }
        }
    }

    let remote_branches = remote_branch_names(repo)?;

    for candidate in ["main", "master"] {
        if remote_branches.iter().any(|b| b == candidate) {
            return Ok(candidate.to_string());
        }
    }

    let head = repo.head()?;
    Ok(head.shorthand().unwrap_or("HEAD").to_string())
}

/// Full hash of the currently checked-out commit.
pub fn head_commit_hash(repo: &Repository) -> Result<String> {
    let commit = repo.head()?.peel_to_commit()?;
    Ok(commit.id().to_string())
}

/// Whether `text` names a commit in the repository, allowing abbreviated
/// hashes. Tag and branch names resolve to commits too, so this also
/// requires `text` to be a prefix of the resolved hash.
pub fn is_commit_hash(repo: &Repository, text: &str) -> bool {
    if text.len() < 4 || !text.chars().all(|c| c.is_ascii_hexdigit()) {
        return false;
    }

    match repo.revparse_single(text) {
        Ok(object) => object
            .peel(ObjectType::Commit)
            .map(|commit| commit.id().to_string().starts_with(&text.to_lowercase()))
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Number of commits the remote counterpart of the current branch has
/// that the local branch does not. Non-zero means the branch is
/// outdated.
pub fn commits_behind_remote(repo: &Repository) -> Result<usize> {
    let head = repo.head()?;

    let Some(branch_name) = head.shorthand().map(str::to_string) else {
        return Ok(0);
    };

    let local = head.peel_to_commit()?.id();

    let remote = match repo.find_branch(&format!("origin/{branch_name}"), BranchType::Remote) {
        Ok(branch) => branch.get().peel_to_commit()?.id(),
        Err(_) => return Ok(0),
    };

    let (_, behind) = repo.graph_ahead_behind(local, remote)?;
    Ok(behind)
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::path::PathBuf;

    /// Create a git repository at `path` with an initial commit
    /// containing the given files, and return its path.
    pub fn init_repo(path: &Path, files: &[(&str, &str)]) -> PathBuf {
        let repo = Repository::init(path).unwrap();
        write_files(path, files);
        commit_all(&repo, "initial");
        path.to_path_buf()
    }

    pub fn write_files(path: &Path, files: &[(&str, &str)]) {
        for (name, contents) in files {
            let file_path = path.join(name);

            if let Some(parent) = file_path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }

            std::fs::write(file_path, contents).unwrap();
        }
    }

    pub fn commit_all(repo: &Repository, message: &str) {
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();

        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("tester", "tester@localhost").unwrap();

        let parent = repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap();
    }

    pub fn tag_head(repo: &Repository, tag: &str) {
        let head = repo.head().unwrap().peel(ObjectType::Commit).unwrap();
        let sig = git2::Signature::now("tester", "tester@localhost").unwrap();
        repo.tag(tag, &head, &sig, tag, false).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::ordered_version_tags;

    #[test]
    fn test_is_local_url() {
        assert!(is_local_url("/srv/git/foo"));
        assert!(is_local_url("./foo"));
        assert!(is_local_url("~/foo"));
        assert!(!is_local_url("https://example.com/foo"));
    }

    #[test]
    fn test_clone_and_tags() {
        let upstream_dir = tempfile::tempdir().unwrap();
        testutil::init_repo(upstream_dir.path(), &[("README", "hi")]);
        let upstream = Repository::open(upstream_dir.path()).unwrap();
        testutil::tag_head(&upstream, "v1.0.0");
        testutil::write_files(upstream_dir.path(), &[("README", "hi again")]);
        testutil::commit_all(&upstream, "update");
        testutil::tag_head(&upstream, "v0.9.0");

        let clone_dir = tempfile::tempdir().unwrap();
        let repo = clone(
            upstream_dir.path().to_str().unwrap(),
            clone_dir.path(),
            true,
        )
        .unwrap();

        let tags = ordered_version_tags(tag_names(&repo).unwrap());
        assert_eq!(tags, vec!["v0.9.0", "v1.0.0"]);
    }

    #[test]
    fn test_checkout_tag_detaches() {
        let upstream_dir = tempfile::tempdir().unwrap();
        testutil::init_repo(upstream_dir.path(), &[("a", "1")]);
        let upstream = Repository::open(upstream_dir.path()).unwrap();
        testutil::tag_head(&upstream, "v1.0.0");
        testutil::write_files(upstream_dir.path(), &[("a", "2")]);
        testutil::commit_all(&upstream, "second");

        let clone_dir = tempfile::tempdir().unwrap();
        let repo = clone(
            upstream_dir.path().to_str().unwrap(),
            clone_dir.path(),
            true,
        )
        .unwrap();

        checkout(&repo, "v1.0.0").unwrap();
        assert_eq!(
            std::fs::read_to_string(clone_dir.path().join("a")).unwrap(),
            "1"
        );
        assert!(repo.head_detached().unwrap());
    }

    #[test]
    fn test_is_commit_hash() {
        let dir = tempfile::tempdir().unwrap();
        testutil::init_repo(dir.path(), &[("a", "1")]);
        let repo = Repository::open(dir.path()).unwrap();

        let full = head_commit_hash(&repo).unwrap();
        assert!(is_commit_hash(&repo, &full));
        assert!(is_commit_hash(&repo, &full[..8]));
        assert!(!is_commit_hash(&repo, "main"));
        assert!(!is_commit_hash(&repo, "deadbeef"));
    }

    #[test]
    fn test_default_branch_prefers_remote_head() {
        let upstream_dir = tempfile::tempdir().unwrap();
        testutil::init_repo(upstream_dir.path(), &[("a", "1")]);

        let clone_dir = tempfile::tempdir().unwrap();
        let repo = clone(
            upstream_dir.path().to_str().unwrap(),
            clone_dir.path(),
            false,
        )
        .unwrap();

        let upstream = Repository::open(upstream_dir.path()).unwrap();
        let expected = upstream.head().unwrap().shorthand().unwrap().to_string();
        assert_eq!(default_branch(&repo).unwrap(), expected);
    }

    #[test]
    fn test_pull_fast_forwards() {
        let upstream_dir = tempfile::tempdir().unwrap();
        testutil::init_repo(upstream_dir.path(), &[("a", "1")]);

        let clone_dir = tempfile::tempdir().unwrap();
        let repo = clone(
            upstream_dir.path().to_str().unwrap(),
            clone_dir.path(),
            false,
        )
        .unwrap();

        let upstream = Repository::open(upstream_dir.path()).unwrap();
        testutil::write_files(upstream_dir.path(), &[("a", "2")]);
        testutil::commit_all(&upstream, "update");

        fetch(&repo).unwrap();
        assert_eq!(commits_behind_remote(&repo).unwrap(), 1);

        pull(&repo).unwrap();
        assert_eq!(commits_behind_remote(&repo).unwrap(), 0);
        assert_eq!(
            std::fs::read_to_string(clone_dir.path().join("a")).unwrap(),
            "2"
        );
    }
}
