//! GitHub releases source.
//!
//! Every release whose tag is a generator version becomes a package; the
//! release's source tarball is the artifact.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

use crate::cache::PackageCache;
use crate::error::PackageError;
use crate::http::HttpClient;
use crate::runtime::Runtime;
use crate::version::Version;

use super::{RepoId, Source, SourceKind, SourcePackage, cancellable};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const PER_PAGE: usize = 100;

/// Upper bound on pages fetched per update (10,000 releases).
const MAX_PAGES: usize = 100;

/// GitHub API response types (internal).
mod api {
    use chrono::{DateTime, Utc};
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    pub struct Release {
        pub tag_name: String,
        pub tarball_url: Option<String>,
        pub published_at: Option<DateTime<Utc>>,
    }
}

pub struct GitHubSource<R: Runtime> {
    http_client: HttpClient,
    api_url: String,
    repo: RepoId,
    cache: PackageCache<R>,
    index: RwLock<BTreeMap<Version, SourcePackage>>,
}

impl<R: Runtime> GitHubSource<R> {
    /// Creates a source for `repo`. Artifacts are cached under
    /// `<cache_root>/github/<owner>/<repo>`.
    pub fn new(
        runtime: Arc<R>,
        http_client: HttpClient,
        api_url: &str,
        repo: RepoId,
        cache_root: &Path,
    ) -> Self {
        let cache_dir = cache_root.join("github").join(&repo.owner).join(&repo.repo);
        Self {
            http_client,
            api_url: api_url.trim_end_matches('/').to_string(),
            repo,
            cache: PackageCache::new(runtime, cache_dir),
            index: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        self.cache.dir()
    }

    async fn fetch_releases(&self) -> Result<Vec<api::Release>> {
        let url = format!(
            "{}/repos/{}/{}/releases",
            self.api_url, self.repo.owner, self.repo.repo
        );
        let per_page = PER_PAGE.to_string();
        let mut releases = Vec::new();

        for page in 1..=MAX_PAGES {
            debug!("Fetching releases page {} from {}...", page, url);
            let page = page.to_string();
            let parsed: Vec<api::Release> = self
                .http_client
                .get_json_with_query(&url, &[("per_page", per_page.as_str()), ("page", page.as_str())])
                .await
                .with_context(|| format!("Failed to list releases of {}", self.repo))?;

            let last_page = parsed.len() < PER_PAGE;
            releases.extend(parsed);
            if last_page {
                break;
            }
        }

        Ok(releases)
    }
}

/// Maps a release to a package. Tags may carry a leading `v`.
fn to_package(release: api::Release) -> Option<SourcePackage> {
    let tag = release.tag_name.strip_prefix('v').unwrap_or(&release.tag_name);
    let Ok(version) = tag.parse::<Version>() else {
        debug!("Skipping release {:?}: not a generator version", release.tag_name);
        return None;
    };
    let (Some(published_at), Some(locator)) = (release.published_at, release.tarball_url) else {
        debug!("Skipping unpublished release {:?}", release.tag_name);
        return None;
    };
    Some(SourcePackage {
        version,
        published_at,
        locator,
    })
}

#[async_trait]
impl<R: Runtime + 'static> Source for GitHubSource<R> {
    fn kind(&self) -> SourceKind {
        SourceKind::GitHub
    }

    fn name(&self) -> String {
        self.repo.to_string()
    }

    #[tracing::instrument(skip(self, cancel), fields(repo = %self.repo))]
    async fn update(&self, cancel: &CancellationToken) -> Result<()> {
        let releases = cancellable(cancel, self.fetch_releases()).await?;
        let total = releases.len();

        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        let mut accepted = 0;
        for package in releases.into_iter().filter_map(to_package) {
            index.insert(package.version.clone(), package);
            accepted += 1;
        }
        debug!(
            "{}: {} of {} releases are generator packages",
            self.repo, accepted, total
        );
        Ok(())
    }

    fn list_packages(&self) -> Vec<SourcePackage> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index.values().cloned().collect()
    }

    fn get_package(&self, version: &Version) -> Result<SourcePackage> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index
            .get(version)
            .cloned()
            .ok_or_else(|| PackageError::PackageNotFound(version.to_string()).into())
    }

    #[tracing::instrument(skip(self, cancel), fields(repo = %self.repo))]
    async fn download(&self, version: &Version, cancel: &CancellationToken) -> Result<()> {
        if self.is_cached(version) {
            return Ok(());
        }
        let package = self.get_package(version)?;
        let runtime = self.cache.runtime();

        self.cache
            .store(version, |partial| async move {
                let download = self
                    .http_client
                    .download_file(&package.locator, || runtime.create_file(&partial));
                cancellable(cancel, download).await?;
                Ok(())
            })
            .await
            .with_context(|| format!("Failed to download {} from {}", version, self.repo))
    }

    async fn unpack(
        &self,
        version: &Version,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !self.is_cached(version) {
            self.download(version, cancel).await?;
        }
        self.cache.unpack(version, destination, cancel).await
    }

    fn purge(&self, version: &Version) -> Result<()> {
        self.cache.purge(version)
    }

    fn is_cached(&self, version: &Version) -> bool {
        self.cache.contains(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RetryPolicy;
    use crate::runtime::RealRuntime;
    use chrono::{TimeZone, Utc};
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use mockito::{Matcher, Server, ServerGuard};
    use std::io::Write;
    use tempfile::{TempDir, tempdir};

    fn version(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn source(server: &ServerGuard, cache: &TempDir) -> GitHubSource<RealRuntime> {
        let http = HttpClient::new(reqwest::Client::new()).with_policy(RetryPolicy::none());
        GitHubSource::new(
            Arc::new(RealRuntime),
            http,
            &server.url(),
            "Elagatua/OoT-Randomizer".parse().unwrap(),
            cache.path(),
        )
    }

    fn release_json(tag: &str, published_at: &str, tarball_url: &str) -> String {
        format!(
            r#"{{"tag_name": "{}", "published_at": "{}", "tarball_url": "{}"}}"#,
            tag, published_at, tarball_url
        )
    }

    async fn mock_page(server: &mut ServerGuard, page: usize, body: String) -> mockito::Mock {
        server
            .mock("GET", "/repos/Elagatua/OoT-Randomizer/releases")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("per_page".into(), "100".into()),
                Matcher::UrlEncoded("page".into(), page.to_string()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    fn generator_tarball() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_path("Elagatua-OoT-Randomizer-1a2b3c/").unwrap();
        dir.set_mode(0o755);
        dir.set_size(0);
        dir.set_cksum();
        builder.append(&dir, std::io::empty()).unwrap();

        let content = b"import sys\n";
        let mut file = tar::Header::new_gnu();
        file.set_path("Elagatua-OoT-Randomizer-1a2b3c/OoTRandomizer.py")
            .unwrap();
        file.set_mode(0o644);
        file.set_size(content.len() as u64);
        file.set_cksum();
        builder.append(&file, &content[..]).unwrap();

        let mut link = tar::Header::new_gnu();
        link.set_entry_type(tar::EntryType::Symlink);
        link.set_size(0);
        builder
            .append_link(
                &mut link,
                "Elagatua-OoT-Randomizer-1a2b3c/Randomizer.py",
                "OoTRandomizer.py",
            )
            .unwrap();

        let tar = builder.into_inner().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_identity() {
        let server_url = "http://127.0.0.1:1";
        let cache = tempdir().unwrap();
        let source = GitHubSource::new(
            Arc::new(RealRuntime),
            HttpClient::new(reqwest::Client::new()),
            server_url,
            "Elagatua/OoT-Randomizer".parse().unwrap(),
            cache.path(),
        );
        assert_eq!(source.kind(), SourceKind::GitHub);
        assert_eq!(source.name(), "Elagatua/OoT-Randomizer");
        assert_eq!(
            source.cache_dir(),
            cache.path().join("github/Elagatua/OoT-Randomizer")
        );
    }

    #[test]
    fn test_to_package_filters_tags() {
        let release = |tag: &str| api::Release {
            tag_name: tag.to_string(),
            tarball_url: Some("https://example.com/t".to_string()),
            published_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        };

        assert!(to_package(release("v8.1")).is_none());
        assert!(to_package(release("nightly")).is_none());
        assert_eq!(
            to_package(release("v7.1.0-blitz-0.43")).unwrap().version,
            version("7.1.0-blitz-0.43")
        );

        let unpublished = api::Release {
            published_at: None,
            ..release("7.1.0-blitz-0.44")
        };
        assert!(to_package(unpublished).is_none());
    }

    #[tokio::test]
    async fn test_update_paginates_and_skips_foreign_tags() {
        let mut server = Server::new_async().await;
        let cache = tempdir().unwrap();

        let mut first_page: Vec<String> = (0..99)
            .map(|i| release_json(&format!("v8.0.{}", i), "2023-05-01T00:00:00Z", "x"))
            .collect();
        first_page.push(release_json(
            "7.1.0-blitz-0.43",
            "2023-06-01T12:00:00Z",
            "https://example.com/43.tar.gz",
        ));
        let page1 = mock_page(&mut server, 1, format!("[{}]", first_page.join(","))).await;
        let page2 = mock_page(
            &mut server,
            2,
            format!(
                "[{}]",
                release_json(
                    "7.1.0-blitz-0.44",
                    "2023-07-01T12:00:00Z",
                    "https://example.com/44.tar.gz"
                )
            ),
        )
        .await;

        let source = source(&server, &cache);
        source.update(&CancellationToken::new()).await.unwrap();

        page1.assert_async().await;
        page2.assert_async().await;

        let packages = source.list_packages();
        assert_eq!(packages.len(), 2);
        let p43 = source.get_package(&version("7.1.0-blitz-0.43")).unwrap();
        assert_eq!(p43.locator, "https://example.com/43.tar.gz");
        assert_eq!(
            p43.published_at,
            Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_update_last_seen_wins() {
        let mut server = Server::new_async().await;
        let cache = tempdir().unwrap();
        let body = format!(
            "[{},{}]",
            release_json("7.1.0-blitz-0.43", "2023-06-01T00:00:00Z", "https://a/1"),
            release_json("v7.1.0-blitz-0.43", "2023-08-01T00:00:00Z", "https://a/2"),
        );
        let _page = mock_page(&mut server, 1, body).await;

        let source = source(&server, &cache);
        source.update(&CancellationToken::new()).await.unwrap();

        let package = source.get_package(&version("7.1.0-blitz-0.43")).unwrap();
        assert_eq!(package.locator, "https://a/2");
        assert_eq!(
            package.published_at,
            Utc.with_ymd_and_hms(2023, 8, 1, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_failed_update_keeps_previous_catalog() {
        let mut server = Server::new_async().await;
        let cache = tempdir().unwrap();
        let good = mock_page(
            &mut server,
            1,
            format!(
                "[{}]",
                release_json("7.1.0-blitz-0.43", "2023-06-01T00:00:00Z", "https://a/1")
            ),
        )
        .await;

        let source = source(&server, &cache);
        source.update(&CancellationToken::new()).await.unwrap();
        good.remove_async().await;

        let _broken = server
            .mock("GET", "/repos/Elagatua/OoT-Randomizer/releases")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        assert!(source.update(&CancellationToken::new()).await.is_err());
        assert_eq!(source.list_packages().len(), 1);
    }

    #[tokio::test]
    async fn test_get_package_not_found() {
        let server = Server::new_async().await;
        let cache = tempdir().unwrap();
        let source = source(&server, &cache);

        let err = source
            .get_package(&version("7.1.0-blitz-0.43"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PackageError>(),
            Some(PackageError::PackageNotFound(_))
        ));

        let err = source
            .download(&version("7.1.0-blitz-0.43"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PackageError>(),
            Some(PackageError::PackageNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_download_unpack_and_purge() {
        let mut server = Server::new_async().await;
        let cache = tempdir().unwrap();
        let tarball_url = format!("{}/tarball/7.1.0-blitz-0.43", server.url());
        let _page = mock_page(
            &mut server,
            1,
            format!(
                "[{}]",
                release_json("7.1.0-blitz-0.43", "2023-06-01T00:00:00Z", &tarball_url)
            ),
        )
        .await;
        let tarball = server
            .mock("GET", "/tarball/7.1.0-blitz-0.43")
            .with_status(200)
            .with_body(generator_tarball())
            .expect(1)
            .create_async()
            .await;

        let source = source(&server, &cache);
        let cancel = CancellationToken::new();
        let v = version("7.1.0-blitz-0.43");
        source.update(&cancel).await.unwrap();

        assert!(!source.is_cached(&v));
        source.download(&v, &cancel).await.unwrap();
        assert!(source.is_cached(&v));
        assert!(
            source
                .cache_dir()
                .join("7.1.0-blitz-0.43.tar.gz")
                .exists()
        );

        // Cached: no second request
        source.download(&v, &cancel).await.unwrap();
        tarball.assert_async().await;

        let dest = tempdir().unwrap();
        let out = dest.path().join("unpacked");
        source.unpack(&v, &out, &cancel).await.unwrap();
        let root = out.join("Elagatua-OoT-Randomizer-1a2b3c");
        assert_eq!(
            std::fs::read(root.join("OoTRandomizer.py")).unwrap(),
            b"import sys\n"
        );
        assert!(std::fs::symlink_metadata(root.join("Randomizer.py")).is_err());

        source.purge(&v).unwrap();
        assert!(!source.is_cached(&v));
        source.purge(&v).unwrap();
    }

    #[tokio::test]
    async fn test_failed_download_is_not_cached() {
        let mut server = Server::new_async().await;
        let cache = tempdir().unwrap();
        let tarball_url = format!("{}/tarball/7.1.0-blitz-0.43", server.url());
        let _page = mock_page(
            &mut server,
            1,
            format!(
                "[{}]",
                release_json("7.1.0-blitz-0.43", "2023-06-01T00:00:00Z", &tarball_url)
            ),
        )
        .await;
        let _tarball = server
            .mock("GET", "/tarball/7.1.0-blitz-0.43")
            .with_status(503)
            .create_async()
            .await;

        let source = source(&server, &cache);
        let cancel = CancellationToken::new();
        let v = version("7.1.0-blitz-0.43");
        source.update(&cancel).await.unwrap();

        assert!(source.download(&v, &cancel).await.is_err());
        assert!(!source.is_cached(&v));
        assert!(source.unpack(&v, cache.path(), &cancel).await.is_err());
    }
}
