//! Stock footage and photo search and download via the Pexels API.

use async_trait::async_trait;
use reel_models::{AssetKind, AssetRef};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::adapter::Adapter;
use crate::error::{AdapterError, AdapterResult};
use crate::http::{build_client, check_response, env_var, require_env};

const NAME: &str = "pexels";
const DEFAULT_BASE_URL: &str = "https://api.pexels.com";
const RESULTS_PER_QUERY: u32 = 5;

/// Leading keywords that also get a still photo.
pub const PHOTO_KEYWORDS: usize = 3;
const PHOTOS_PER_QUERY: u32 = 3;

/// Pexels client configuration.
#[derive(Debug, Clone)]
pub struct PexelsConfig {
    pub api_key: String,
    pub base_url: String,
    /// Downloads larger than this are skipped
    pub max_download_bytes: u64,
    pub timeout: Duration,
}

impl PexelsConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_download_bytes: 200 * 1024 * 1024,
            timeout: Duration::from_secs(300),
        }
    }

    /// Load from `PEXELS_API_KEY` and `PEXELS_BASE_URL`.
    pub fn from_env() -> AdapterResult<Self> {
        let mut config = Self::new(require_env("PEXELS_API_KEY")?);
        if let Some(base_url) = env_var("PEXELS_BASE_URL") {
            config.base_url = base_url;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Keywords to search and where to put the downloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualRequest {
    /// Search terms, most relevant first
    pub keywords: Vec<String>,
    /// Assets kept from each keyword's results
    pub per_keyword: usize,
    /// Overall cap on downloaded assets
    pub max_assets: usize,
    pub download_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    videos: Vec<Video>,
}

#[derive(Debug, Deserialize)]
struct PhotoSearchResponse {
    #[serde(default)]
    photos: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    id: u64,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
    src: PhotoSources,
}

#[derive(Debug, Deserialize)]
struct PhotoSources {
    #[serde(default)]
    large: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Video {
    id: u64,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    video_files: Vec<VideoFile>,
}

#[derive(Debug, Clone, Deserialize)]
struct VideoFile {
    link: String,
    #[serde(default)]
    file_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    size: Option<u64>,
}

impl VideoFile {
    fn score(&self) -> u64 {
        self.size.unwrap_or_else(|| {
            u64::from(self.width.unwrap_or(0)) * u64::from(self.height.unwrap_or(0))
        })
    }
}

/// Largest MP4 rendition of a video.
fn best_file(video: &Video) -> Option<&VideoFile> {
    video
        .video_files
        .iter()
        .filter(|f| f.file_type.as_deref().map_or(true, |t| t == "video/mp4"))
        .max_by_key(|f| f.score())
}

/// Visual search adapter backed by Pexels.
pub struct PexelsAdapter {
    http: Client,
    config: PexelsConfig,
}

impl PexelsAdapter {
    pub fn new(config: PexelsConfig) -> AdapterResult<Self> {
        Ok(Self {
            http: build_client(config.timeout)?,
            config,
        })
    }

    async fn search(&self, query: &str) -> AdapterResult<Vec<Video>> {
        let url = format!("{}/videos/search", self.config.base_url.trim_end_matches('/'));
        let per_page = RESULTS_PER_QUERY.to_string();
        let response = self
            .http
            .get(url)
            .header("Authorization", &self.config.api_key)
            .query(&[
                ("query", query),
                ("per_page", per_page.as_str()),
                ("orientation", "landscape"),
                ("size", "large"),
            ])
            .send()
            .await?;
        let body: SearchResponse = check_response(NAME, response).await?.json().await?;
        Ok(body.videos)
    }

    async fn search_photos(&self, query: &str) -> AdapterResult<Vec<Photo>> {
        let url = format!("{}/v1/search", self.config.base_url.trim_end_matches('/'));
        let per_page = PHOTOS_PER_QUERY.to_string();
        let response = self
            .http
            .get(url)
            .header("Authorization", &self.config.api_key)
            .query(&[
                ("query", query),
                ("per_page", per_page.as_str()),
                ("orientation", "landscape"),
                ("size", "large"),
            ])
            .send()
            .await?;
        let body: PhotoSearchResponse = check_response(NAME, response).await?.json().await?;
        Ok(body.photos)
    }

    /// One still per leading keyword, up to `room` assets. Photos are
    /// supplementary, so search and download failures are only logged.
    async fn collect_photos(&self, request: &VisualRequest, room: usize) -> Vec<AssetRef> {
        let mut assets = Vec::new();
        let mut seen = HashSet::new();

        for keyword in request.keywords.iter().take(PHOTO_KEYWORDS) {
            if assets.len() >= room {
                break;
            }
            let photos = match self.search_photos(keyword).await {
                Ok(photos) => photos,
                Err(e) => {
                    warn!(keyword = %keyword, error = %e, "Photo search failed, skipping");
                    continue;
                }
            };
            let Some((photo, link)) = photos
                .iter()
                .filter(|p| !seen.contains(&p.id))
                .find_map(|p| p.src.large.as_ref().map(|link| (p, link)))
            else {
                continue;
            };
            seen.insert(photo.id);

            let file_name = format!("image_{}.jpg", photo.id);
            let dest = request.download_dir.join(&file_name);
            match self.download(link, &dest).await {
                Ok(bytes) => {
                    debug!(id = photo.id, bytes, "Downloaded photo");
                    assets.push(AssetRef {
                        id: photo.id.to_string(),
                        kind: AssetKind::Image,
                        source_url: link.clone(),
                        query: keyword.clone(),
                        file_name: Some(file_name),
                        duration_secs: None,
                        width: photo.width,
                        height: photo.height,
                    });
                }
                Err(e) => warn!(id = photo.id, error = %e, "Photo download failed, skipping"),
            }
        }
        assets
    }

    /// Stream `url` into `dest` via a `.part` file.
    async fn download(&self, url: &str, dest: &Path) -> AdapterResult<u64> {
        let mut response = check_response(NAME, self.http.get(url).send().await?).await?;
        if let Some(len) = response.content_length() {
            if len > self.config.max_download_bytes {
                return Err(AdapterError::InvalidRequest(
                    413,
                    format!("asset is {} bytes, limit {}", len, self.config.max_download_bytes),
                ));
            }
        }

        let mut part_name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        part_name.push(".part");
        let part = dest.with_file_name(part_name);
        let mut file = tokio::fs::File::create(&part).await?;
        let mut written = 0u64;
        let result: AdapterResult<()> = async {
            while let Some(chunk) = response.chunk().await? {
                written += chunk.len() as u64;
                if written > self.config.max_download_bytes {
                    return Err(AdapterError::InvalidRequest(413, "asset exceeds size limit".into()));
                }
                file.write_all(&chunk).await?;
            }
            file.sync_all().await?;
            Ok(())
        }
        .await;
        drop(file);

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }
        tokio::fs::rename(&part, dest).await?;
        Ok(written)
    }
}

#[async_trait]
impl Adapter for PexelsAdapter {
    type Request = VisualRequest;
    type Response = Vec<AssetRef>;

    fn name(&self) -> &'static str {
        NAME
    }

    /// Search each keyword in order and download the best rendition of the
    /// top results, then a still photo for the leading keywords. Failed
    /// downloads are skipped; an empty result is not an error.
    async fn invoke(&self, request: &VisualRequest) -> AdapterResult<Vec<AssetRef>> {
        tokio::fs::create_dir_all(&request.download_dir).await?;

        let mut assets = Vec::new();
        let mut seen = HashSet::new();
        let mut last_error = None;

        'keywords: for keyword in &request.keywords {
            let videos = match self.search(keyword).await {
                Ok(videos) => videos,
                Err(e) if e.is_retryable() => {
                    warn!(keyword = %keyword, error = %e, "Visual search failed, trying next keyword");
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            debug!(keyword = %keyword, results = videos.len(), "Visual search");

            let mut taken = 0;
            for video in &videos {
                if taken >= request.per_keyword {
                    break;
                }
                if assets.len() >= request.max_assets {
                    break 'keywords;
                }
                if !seen.insert(video.id) {
                    continue;
                }
                let Some(file) = best_file(video) else {
                    continue;
                };

                let file_name = format!("video_{}.mp4", video.id);
                let dest = request.download_dir.join(&file_name);
                match self.download(&file.link, &dest).await {
                    Ok(bytes) => {
                        debug!(id = video.id, bytes, "Downloaded visual");
                        assets.push(AssetRef {
                            id: video.id.to_string(),
                            kind: AssetKind::Video,
                            source_url: file.link.clone(),
                            query: keyword.clone(),
                            file_name: Some(file_name),
                            duration_secs: video.duration,
                            width: file.width.unwrap_or(0),
                            height: file.height.unwrap_or(0),
                        });
                        taken += 1;
                    }
                    Err(e) => warn!(id = video.id, error = %e, "Visual download failed, skipping"),
                }
            }
        }

        let room = request.max_assets.saturating_sub(assets.len());
        if room > 0 {
            let photos = self.collect_photos(request, room).await;
            debug!(photos = photos.len(), "Photos collected");
            assets.extend(photos);
        }

        if assets.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        info!(assets = assets.len(), keywords = request.keywords.len(), "Visuals collected");
        Ok(assets)
    }

    async fn probe(&self) -> AdapterResult<String> {
        let videos = self.search("cinematic").await?;
        Ok(format!("search returned {} videos", videos.len()))
    }
}
