// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Assets
//!
//! Plain data carriers for scan targets. Each asset kind maps to exactly
//! one selector; the orchestrator publishes initial assets on
//! `{selector}.{uuid}`.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

pub const FILE_SELECTOR: &str = "v3.asset.file";
pub const DOMAIN_NAME_SELECTOR: &str = "v3.asset.domain_name";
pub const IPV4_SELECTOR: &str = "v3.asset.ip.v4";
pub const IPV6_SELECTOR: &str = "v3.asset.ip.v6";
pub const ANDROID_APK_SELECTOR: &str = "v3.asset.file.android.apk";
pub const ANDROID_AAB_SELECTOR: &str = "v3.asset.file.android.aab";
pub const IOS_IPA_SELECTOR: &str = "v3.asset.file.ios.ipa";
pub const LINK_SELECTOR: &str = "v3.asset.link";
pub const ANDROID_STORE_SELECTOR: &str = "v3.asset.store.android_store";
pub const IOS_STORE_SELECTOR: &str = "v3.asset.store.ios_store";

/// File-like payload: inline bytes, the path they were read from, or a URL
/// the agent downloads itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAsset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
}

impl FileAsset {
    pub fn from_content(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Reads `path` eagerly; the agent receives both content and path.
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            content: Some(std::fs::read(path)?),
            path: Some(path.to_path_buf()),
            content_url: None,
        })
    }

    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            content_url: Some(url.into()),
            ..Default::default()
        }
    }

    fn describe(&self) -> String {
        if let Some(url) = &self.content_url {
            url.clone()
        } else if let Some(path) = &self.path {
            path.display().to_string()
        } else {
            format!(
                "{} bytes",
                self.content.as_ref().map(Vec::len).unwrap_or_default()
            )
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Asset {
    File(FileAsset),
    DomainName {
        name: String,
    },
    Ipv4 {
        host: Ipv4Addr,
        #[serde(default = "default_v4_mask")]
        mask: u8,
    },
    Ipv6 {
        host: Ipv6Addr,
        #[serde(default = "default_v6_mask")]
        mask: u8,
    },
    AndroidApk(FileAsset),
    AndroidAab(FileAsset),
    IosIpa(FileAsset),
    Link {
        url: String,
        #[serde(default = "default_method")]
        method: String,
    },
    AndroidStore {
        package_name: String,
    },
    IosStore {
        bundle_id: String,
    },
}

fn default_v4_mask() -> u8 {
    32
}

fn default_v6_mask() -> u8 {
    128
}

fn default_method() -> String {
    "GET".to_string()
}

impl Asset {
    pub fn selector(&self) -> &'static str {
        match self {
            Asset::File(_) => FILE_SELECTOR,
            Asset::DomainName { .. } => DOMAIN_NAME_SELECTOR,
            Asset::Ipv4 { .. } => IPV4_SELECTOR,
            Asset::Ipv6 { .. } => IPV6_SELECTOR,
            Asset::AndroidApk(_) => ANDROID_APK_SELECTOR,
            Asset::AndroidAab(_) => ANDROID_AAB_SELECTOR,
            Asset::IosIpa(_) => IOS_IPA_SELECTOR,
            Asset::Link { .. } => LINK_SELECTOR,
            Asset::AndroidStore { .. } => ANDROID_STORE_SELECTOR,
            Asset::IosStore { .. } => IOS_STORE_SELECTOR,
        }
    }

    pub fn domain(name: impl Into<String>) -> Self {
        Asset::DomainName { name: name.into() }
    }

    pub fn link(url: impl Into<String>) -> Self {
        Asset::Link {
            url: url.into(),
            method: default_method(),
        }
    }

    /// Builds an IPv4 or IPv6 asset from `host[/mask]`.
    pub fn ip(spec: &str) -> Result<Self, String> {
        let (host, mask) = match spec.split_once('/') {
            Some((host, mask)) => (
                host,
                Some(
                    mask.parse::<u8>()
                        .map_err(|_| format!("invalid network mask '{}'", mask))?,
                ),
            ),
            None => (spec, None),
        };
        if let Ok(v4) = host.parse::<Ipv4Addr>() {
            let mask = mask.unwrap_or(32);
            if mask > 32 {
                return Err(format!("mask {} exceeds 32 for {}", mask, host));
            }
            return Ok(Asset::Ipv4 { host: v4, mask });
        }
        if let Ok(v6) = host.parse::<Ipv6Addr>() {
            let mask = mask.unwrap_or(128);
            if mask > 128 {
                return Err(format!("mask {} exceeds 128 for {}", mask, host));
            }
            return Ok(Asset::Ipv6 { host: v6, mask });
        }
        Err(format!("'{}' is not an IP address", host))
    }

    /// Short label for logs.
    pub fn describe(&self) -> String {
        match self {
            Asset::File(file)
            | Asset::AndroidApk(file)
            | Asset::AndroidAab(file)
            | Asset::IosIpa(file) => format!("{} ({})", self.selector(), file.describe()),
            Asset::DomainName { name } => name.clone(),
            Asset::Ipv4 { host, mask } => format!("{}/{}", host, mask),
            Asset::Ipv6 { host, mask } => format!("{}/{}", host, mask),
            Asset::Link { url, .. } => url.clone(),
            Asset::AndroidStore { package_name } => package_name.clone(),
            Asset::IosStore { bundle_id } => bundle_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_selectors() {
        assert_eq!(Asset::domain("ostorlab.co").selector(), DOMAIN_NAME_SELECTOR);
        assert_eq!(Asset::File(FileAsset::from_content(b"x".to_vec())).selector(), FILE_SELECTOR);
        assert_eq!(
            Asset::AndroidApk(FileAsset::from_url("https://x/app.apk")).selector(),
            "v3.asset.file.android.apk"
        );
    }

    #[test]
    fn test_file_from_path_keeps_content_and_path() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"May the Force be with you").unwrap();
        let asset = FileAsset::from_path(tmp.path()).unwrap();
        assert_eq!(asset.content.as_deref(), Some(&b"May the Force be with you"[..]));
        assert_eq!(asset.path.as_deref(), Some(tmp.path()));
        assert!(asset.content_url.is_none());
    }

    #[test]
    fn test_ip_parsing() {
        assert_eq!(
            Asset::ip("8.8.8.8").unwrap(),
            Asset::Ipv4 {
                host: Ipv4Addr::new(8, 8, 8, 8),
                mask: 32
            }
        );
        assert_eq!(Asset::ip("10.0.0.0/24").unwrap().selector(), IPV4_SELECTOR);
        assert_eq!(Asset::ip("::1").unwrap().selector(), IPV6_SELECTOR);
        assert!(Asset::ip("10.0.0.0/33").is_err());
        assert!(Asset::ip("example.com").is_err());
    }

    #[test]
    fn test_serde_tagging() {
        let asset: Asset =
            serde_json::from_str(r#"{"type": "domain_name", "name": "example.com"}"#).unwrap();
        assert_eq!(asset, Asset::domain("example.com"));

        let link: Asset = serde_json::from_str(r#"{"type": "link", "url": "https://x"}"#).unwrap();
        assert_eq!(link, Asset::link("https://x"));

        let file: Asset =
            serde_json::from_str(r#"{"type": "file", "content_url": "https://x/f"}"#).unwrap();
        assert_eq!(file, Asset::File(FileAsset::from_url("https://x/f")));
    }
}
