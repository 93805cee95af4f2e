use crate::config::PhotoConfig;
use crate::model::LoadRecord;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

/// Outcome of sanitizing a photo array
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoReport {
    /// Accepted URLs in original order
    pub valid: Vec<String>,
    /// UTF-8 length of the JSON-serialized accepted array
    pub total_array_size: usize,
    /// `total_array_size` as a percentage of the field quota, capped at 100
    pub percent_used: u32,
}

/// Validates photo arrays against transport, format and quota rules
#[derive(Debug, Clone)]
pub struct PhotoSanitizer {
    config: PhotoConfig,
}

impl PhotoSanitizer {
    pub fn new(config: PhotoConfig) -> Self {
        Self { config }
    }

    /// Filter `urls` down to the accepted set.
    ///
    /// Never fails: an internal error yields an empty report so that the
    /// surrounding write can proceed.
    pub fn sanitize<S: AsRef<str>>(&self, urls: &[S]) -> PhotoReport {
        match self.try_sanitize(urls) {
            Ok(report) => {
                let rejected = urls.len().saturating_sub(report.valid.len());
                if rejected > 0 {
                    debug!(rejected, accepted = report.valid.len(), "Dropped photo URLs");
                    metrics::counter!("loads.photos.rejected").increment(rejected as u64);
                }
                report
            }
            Err(e) => {
                warn!(error = %e, "Photo sanitization failed, accepting no photos");
                PhotoReport::default()
            }
        }
    }

    fn try_sanitize<S: AsRef<str>>(&self, urls: &[S]) -> Result<PhotoReport, serde_json::Error> {
        let valid: Vec<String> = urls
            .iter()
            .map(|u| u.as_ref().trim())
            .filter(|u| !u.is_empty())
            .filter(|u| u.starts_with("https://"))
            .filter(|u| self.looks_like_image(u))
            .filter(|u| u.len() <= self.config.max_url_bytes)
            .take(self.config.max_photos)
            .map(str::to_string)
            .collect();

        let total_array_size = serde_json::to_vec(&valid)?.len();
        let percent_used = self.percent_of_quota(total_array_size);

        Ok(PhotoReport {
            valid,
            total_array_size,
            percent_used,
        })
    }

    /// Known image extension (query string allowed) or the storage host
    fn looks_like_image(&self, candidate: &str) -> bool {
        let path = candidate
            .split('?')
            .next()
            .unwrap_or(candidate);

        let has_image_extension = path
            .rsplit_once('.')
            .map(|(_, ext)| {
                self.config
                    .image_extensions
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false);

        has_image_extension || self.is_storage_url(candidate)
    }

    fn is_storage_url(&self, candidate: &str) -> bool {
        Url::parse(candidate)
            .ok()
            .and_then(|url| url.host_str().map(|h| h.eq_ignore_ascii_case(&self.config.storage_host)))
            .unwrap_or(false)
    }

    fn percent_of_quota(&self, size: usize) -> u32 {
        if self.config.field_quota_bytes == 0 {
            return 100;
        }
        let percent = (size as f64 / self.config.field_quota_bytes as f64 * 100.0).round();
        percent.min(100.0) as u32
    }

    /// Sanitize `urls` into `record`, keeping `primary_photo` within `photos`.
    ///
    /// The requested primary is kept if it survived sanitization, otherwise
    /// the first accepted photo becomes primary.
    pub fn apply<S: AsRef<str>>(&self, record: &mut LoadRecord, urls: &[S], primary: Option<&str>) -> PhotoReport {
        let report = self.sanitize(urls);

        let primary = primary
            .map(str::trim)
            .filter(|p| report.valid.iter().any(|v| v.as_str() == *p))
            .map(str::to_string)
            .or_else(|| report.valid.first().cloned())
            .unwrap_or_default();

        record.photos = report.valid.clone();
        record.primary_photo = primary;

        report
    }
}

impl Default for PhotoSanitizer {
    fn default() -> Self {
        Self::new(PhotoConfig::default())
    }
}
