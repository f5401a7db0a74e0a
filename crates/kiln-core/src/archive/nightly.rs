//! Discovery of TheRock nightly runtime tarballs.
//!
//! The nightly bucket is a public S3 listing. Keys look like
//! `therock-dist-linux-gfx1151-7.0.0rc20250610.tar.gz`; the version part is
//! ordered numerically with alpha builds before release candidates before
//! releases.
use std::cmp::Ordering;

use regex::Regex;

use crate::archive::error::ProvisionError;
use crate::archive::http::HttpClient;
use crate::kernel::constants::NIGHTLY_BUCKET_URL;

/// Pre-release rank. Declaration order is the sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PreRelease {
    Alpha,
    Candidate,
    Release,
}

/// Sortable form of a nightly version string
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NightlyVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: PreRelease,
    pub pre_number: u64,
}

impl NightlyVersion {
    /// Parse `7.0.0`, `7.0.0a20250610` or `7.0.0rc3`. Anything else sorts
    /// below every real version.
    pub fn parse(version: &str) -> Self {
        let unparsed = Self { major: 0, minor: 0, patch: 0, pre: PreRelease::Candidate, pre_number: 0 };
        let Ok(re) = Regex::new(r"^(\d+)\.(\d+)\.(\d+)(a|rc)?(\d+)?$") else {
            return unparsed;
        };
        let Some(caps) = re.captures(version) else {
            return unparsed;
        };
        let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok()).unwrap_or(0);
        let pre = match caps.get(4).map(|m| m.as_str()) {
            None => PreRelease::Release,
            Some("a") => PreRelease::Alpha,
            Some(_) => PreRelease::Candidate,
        };
        Self { major: number(1), minor: number(2), patch: number(3), pre, pre_number: number(5) }
    }
}

/// One tarball found in the listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NightlyCandidate {
    pub version: String,
    pub key: String,
    pub url: String,
}

/// Targets published under a suffixed name in the bucket
pub fn bucket_target(target: &str) -> String {
    match target {
        "gfx110X" => format!("{}-dgpu", target),
        "gfx120X" => format!("{}-all", target),
        _ => target.to_string(),
    }
}

/// Listing prefix for `platform` and `target` (7.x releases only)
pub fn listing_prefix(platform: &str, target: &str) -> String {
    format!("therock-dist-{}-{}-7", platform, bucket_target(target))
}

/// Extract matching candidates from an S3 listing, newest first
pub fn parse_listing(listing: &str, platform: &str, target: &str) -> Vec<NightlyCandidate> {
    let stem = format!("therock-dist-{}-{}", platform, bucket_target(target));
    let pattern = format!(r"{}-(\d+\.\d+\.\d+(?:a\d+|rc\d+)?)\.tar\.gz$", regex::escape(&stem));
    let (Ok(key_re), Ok(entry_re)) = (Regex::new(&pattern), Regex::new(r"<Key>([^<]+)</Key>")) else {
        return Vec::new();
    };

    let mut found: Vec<(NightlyVersion, NightlyCandidate)> = entry_re
        .captures_iter(listing)
        .filter_map(|entry| {
            let key = entry.get(1)?.as_str();
            let version = key_re.captures(key)?.get(1)?.as_str().to_string();
            Some((
                NightlyVersion::parse(&version),
                NightlyCandidate { url: format!("{}{}", NIGHTLY_BUCKET_URL, key), key: key.to_string(), version },
            ))
        })
        .collect();

    found.sort_by(|(va, ca), (vb, cb)| match vb.cmp(va) {
        Ordering::Equal => cb.key.cmp(&ca.key),
        other => other,
    });
    found.into_iter().map(|(_, candidate)| candidate).collect()
}

/// Fetch the bucket listing and return up to `count` candidates, newest first
pub async fn list(
    client: &dyn HttpClient,
    platform: &str,
    target: &str,
    count: usize,
) -> Result<Vec<NightlyCandidate>, ProvisionError> {
    let prefix = listing_prefix(platform, target);
    let url = format!("{}?prefix={}", NIGHTLY_BUCKET_URL, prefix);
    log::info!("Fetching nightly listing for prefix {}", prefix);
    let listing = client.get_text(&url).await.map_err(|e| ProvisionError::SourceUnreachable {
        location: url.clone(),
        reason: e.to_string(),
    })?;
    let mut candidates = parse_listing(&listing, platform, target);
    candidates.truncate(count);
    Ok(candidates)
}

/// Newest available tarball for `platform` and `target`
pub async fn newest(client: &dyn HttpClient, platform: &str, target: &str) -> Result<NightlyCandidate, ProvisionError> {
    list(client, platform, target, 1)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ProvisionError::NightlyNotFound { platform: platform.to_string(), target: target.to_string() })
}
