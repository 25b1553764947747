// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Wire Schemas
//!
//! Payloads on the fabric are protobuf messages whose schema is chosen by
//! topic. [`SchemaRegistry`] maps selectors to codecs and resolves a topic
//! to the codec registered under its longest matching selector.
//!
//! Codecs translate between wire bytes and `serde_json::Value`, which is
//! the structured form agents and span attributes work with. `bytes`
//! fields appear as base64 strings in that form.

pub mod v3;

use crate::domain::asset::{self, Asset, FileAsset};
use crate::domain::message::selector_matches;
use prost::Message as _;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

pub const START_AGENT_SCAN_SELECTOR: &str = "v3.control.start_agent_scan";
pub const FINGERPRINT_LIBRARY_SELECTOR: &str = "v3.fingerprint.domain_name.library";

#[derive(Debug, Error)]
pub enum WireError {
    #[error("No schema registered for topic {0}")]
    UnknownSchema(String),
    #[error("Failed to decode {schema} payload: {reason}")]
    Decode { schema: String, reason: String },
    #[error("Failed to encode {schema} payload: {reason}")]
    Encode { schema: String, reason: String },
}

pub trait PayloadCodec: Send + Sync {
    fn schema(&self) -> &str;
    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, WireError>;
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, WireError>;

    /// Paths of the `bytes` fields in the decoded form: `a.b` steps into a
    /// nested message, `a[]` into every element of a repeated field.
    fn bytes_fields(&self) -> &'static [&'static str] {
        &[]
    }
}

/// Codec backed by a prost message type.
pub struct ProstCodec<M> {
    schema: &'static str,
    bytes_fields: &'static [&'static str],
    _marker: PhantomData<fn() -> M>,
}

impl<M> ProstCodec<M> {
    pub fn new(schema: &'static str) -> Self {
        Self {
            schema,
            bytes_fields: &[],
            _marker: PhantomData,
        }
    }

    pub fn with_bytes_fields(mut self, fields: &'static [&'static str]) -> Self {
        self.bytes_fields = fields;
        self
    }
}

impl<M> PayloadCodec for ProstCodec<M>
where
    M: prost::Message + Default + Serialize + DeserializeOwned + 'static,
{
    fn schema(&self) -> &str {
        self.schema
    }

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, WireError> {
        let message = M::decode(bytes).map_err(|e| WireError::Decode {
            schema: self.schema.to_string(),
            reason: e.to_string(),
        })?;
        serde_json::to_value(&message).map_err(|e| WireError::Decode {
            schema: self.schema.to_string(),
            reason: e.to_string(),
        })
    }

    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, WireError> {
        let message: M = serde_json::from_value(value.clone()).map_err(|e| WireError::Encode {
            schema: self.schema.to_string(),
            reason: e.to_string(),
        })?;
        Ok(message.encode_to_vec())
    }

    fn bytes_fields(&self) -> &'static [&'static str] {
        self.bytes_fields
    }
}

/// Schemaless JSON payloads, for topics without a registered protobuf.
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn schema(&self) -> &str {
        "json"
    }

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, WireError> {
        serde_json::from_slice(bytes).map_err(|e| WireError::Decode {
            schema: "json".to_string(),
            reason: e.to_string(),
        })
    }

    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(value).map_err(|e| WireError::Encode {
            schema: "json".to_string(),
            reason: e.to_string(),
        })
    }
}

#[derive(Clone, Default)]
pub struct SchemaRegistry {
    codecs: BTreeMap<String, Arc<dyn PayloadCodec>>,
    fallback: Option<Arc<dyn PayloadCodec>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in v3 schema, with JSON as fallback.
    pub fn v3() -> Self {
        let mut registry = Self::new();
        registry.register(
            asset::FILE_SELECTOR,
            ProstCodec::<v3::File>::new(asset::FILE_SELECTOR).with_bytes_fields(&["content"]),
        );
        registry.register(
            asset::DOMAIN_NAME_SELECTOR,
            ProstCodec::<v3::DomainName>::new(asset::DOMAIN_NAME_SELECTOR),
        );
        registry.register("v3.asset.ip", ProstCodec::<v3::Ip>::new("v3.asset.ip"));
        registry.register(asset::LINK_SELECTOR, ProstCodec::<v3::Link>::new(asset::LINK_SELECTOR));
        registry.register(
            asset::ANDROID_STORE_SELECTOR,
            ProstCodec::<v3::AndroidStore>::new(asset::ANDROID_STORE_SELECTOR),
        );
        registry.register(
            asset::IOS_STORE_SELECTOR,
            ProstCodec::<v3::IosStore>::new(asset::IOS_STORE_SELECTOR),
        );
        registry.register(
            FINGERPRINT_LIBRARY_SELECTOR,
            ProstCodec::<v3::DomainLibraryFingerprint>::new(FINGERPRINT_LIBRARY_SELECTOR),
        );
        registry.register(
            START_AGENT_SCAN_SELECTOR,
            ProstCodec::<v3::StartAgentScan>::new(START_AGENT_SCAN_SELECTOR).with_bytes_fields(&[
                "agents[].args[].value",
                "android_apk.content",
                "android_aab.content",
                "ios_ipa.content",
                "file.content",
            ]),
        );
        registry.with_fallback(JsonCodec)
    }

    pub fn register(&mut self, selector: &str, codec: impl PayloadCodec + 'static) {
        self.codecs.insert(selector.to_string(), Arc::new(codec));
    }

    pub fn with_fallback(mut self, codec: impl PayloadCodec + 'static) -> Self {
        self.fallback = Some(Arc::new(codec));
        self
    }

    /// Codec registered under the longest selector matching `topic`.
    pub fn resolve(&self, topic: &str) -> Option<Arc<dyn PayloadCodec>> {
        self.codecs
            .iter()
            .filter(|(selector, _)| selector_matches(selector, topic))
            .max_by_key(|(selector, _)| selector.len())
            .map(|(_, codec)| codec.clone())
            .or_else(|| self.fallback.clone())
    }

    pub fn decode(&self, topic: &str, bytes: &[u8]) -> Result<serde_json::Value, WireError> {
        self.resolve(topic)
            .ok_or_else(|| WireError::UnknownSchema(topic.to_string()))?
            .decode(bytes)
    }

    pub fn encode(&self, topic: &str, value: &serde_json::Value) -> Result<Vec<u8>, WireError> {
        self.resolve(topic)
            .ok_or_else(|| WireError::UnknownSchema(topic.to_string()))?
            .encode(value)
    }

    /// Replaces each base64 `bytes` field of a decoded `topic` payload with
    /// `render` applied to the raw bytes.
    pub fn render_bytes(
        &self,
        topic: &str,
        value: &mut serde_json::Value,
        render: &dyn Fn(&[u8]) -> String,
    ) {
        let Some(codec) = self.resolve(topic) else {
            return;
        };
        for path in codec.bytes_fields() {
            let segments: Vec<&str> = path.split('.').collect();
            render_bytes_at(value, &segments, render);
        }
    }
}

fn render_bytes_at(value: &mut serde_json::Value, path: &[&str], render: &dyn Fn(&[u8]) -> String) {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    let Some((head, rest)) = path.split_first() else {
        if let serde_json::Value::String(encoded) = value {
            if let Ok(raw) = STANDARD.decode(encoded.as_bytes()) {
                *value = serde_json::Value::String(render(&raw));
            }
        }
        return;
    };
    let (field, each) = match head.strip_suffix("[]") {
        Some(field) => (field, true),
        None => (*head, false),
    };
    let Some(child) = value.get_mut(field) else {
        return;
    };
    match child {
        serde_json::Value::Array(items) if each => {
            for item in items {
                render_bytes_at(item, rest, render);
            }
        }
        _ if each => {}
        child => render_bytes_at(child, rest, render),
    }
}

pub(crate) fn file_message(file: &FileAsset) -> v3::File {
    v3::File {
        content: file.content.clone(),
        path: file.path.as_ref().map(|p| p.display().to_string()),
        content_url: file.content_url.clone(),
    }
}

pub(crate) fn file_asset(message: v3::File) -> FileAsset {
    FileAsset {
        content: message.content,
        path: message.path.map(Into::into),
        content_url: message.content_url,
    }
}

/// Wire payload for an initial asset.
pub fn encode_asset(asset: &Asset) -> Vec<u8> {
    match asset {
        Asset::File(file)
        | Asset::AndroidApk(file)
        | Asset::AndroidAab(file)
        | Asset::IosIpa(file) => file_message(file).encode_to_vec(),
        Asset::DomainName { name } => v3::DomainName { name: name.clone() }.encode_to_vec(),
        Asset::Ipv4 { host, mask } => v3::Ip {
            host: host.to_string(),
            mask: Some(mask.to_string()),
            version: Some(4),
        }
        .encode_to_vec(),
        Asset::Ipv6 { host, mask } => v3::Ip {
            host: host.to_string(),
            mask: Some(mask.to_string()),
            version: Some(6),
        }
        .encode_to_vec(),
        Asset::Link { url, method } => v3::Link {
            url: url.clone(),
            method: method.clone(),
        }
        .encode_to_vec(),
        Asset::AndroidStore { package_name } => v3::AndroidStore {
            package_name: package_name.clone(),
        }
        .encode_to_vec(),
        Asset::IosStore { bundle_id } => v3::IosStore {
            bundle_id: bundle_id.clone(),
        }
        .encode_to_vec(),
    }
}

/// Rebuilds an asset from a payload published on `selector`.
pub fn decode_asset(selector: &str, bytes: &[u8]) -> Result<Asset, WireError> {
    let decode_err = |e: prost::DecodeError| WireError::Decode {
        schema: selector.to_string(),
        reason: e.to_string(),
    };
    let ip_err = |reason: String| WireError::Decode {
        schema: selector.to_string(),
        reason,
    };
    match selector {
        asset::FILE_SELECTOR => Ok(Asset::File(file_asset(v3::File::decode(bytes).map_err(decode_err)?))),
        asset::ANDROID_APK_SELECTOR => Ok(Asset::AndroidApk(file_asset(
            v3::File::decode(bytes).map_err(decode_err)?,
        ))),
        asset::ANDROID_AAB_SELECTOR => Ok(Asset::AndroidAab(file_asset(
            v3::File::decode(bytes).map_err(decode_err)?,
        ))),
        asset::IOS_IPA_SELECTOR => Ok(Asset::IosIpa(file_asset(
            v3::File::decode(bytes).map_err(decode_err)?,
        ))),
        asset::DOMAIN_NAME_SELECTOR => Ok(Asset::domain(
            v3::DomainName::decode(bytes).map_err(decode_err)?.name,
        )),
        asset::IPV4_SELECTOR | asset::IPV6_SELECTOR => {
            let ip = v3::Ip::decode(bytes).map_err(decode_err)?;
            let spec = match ip.mask {
                Some(mask) => format!("{}/{}", ip.host, mask),
                None => ip.host,
            };
            Asset::ip(&spec).map_err(ip_err)
        }
        asset::LINK_SELECTOR => {
            let link = v3::Link::decode(bytes).map_err(decode_err)?;
            Ok(Asset::Link {
                url: link.url,
                method: link.method,
            })
        }
        asset::ANDROID_STORE_SELECTOR => Ok(Asset::AndroidStore {
            package_name: v3::AndroidStore::decode(bytes).map_err(decode_err)?.package_name,
        }),
        asset::IOS_STORE_SELECTOR => Ok(Asset::IosStore {
            bundle_id: v3::IosStore::decode(bytes).map_err(decode_err)?.bundle_id,
        }),
        other => Err(WireError::UnknownSchema(other.to_string())),
    }
}

/// Serde adapter rendering `bytes` fields as base64 strings.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::STANDARD;
        use base64::Engine;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            bytes: &Option<Vec<u8>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match bytes {
                Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Vec<u8>>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_longest_prefix_resolution() {
        let registry = SchemaRegistry::v3();
        let apk = registry.resolve("v3.asset.file.android.apk.123e4567-e89b-12d3-a456-426614174000");
        assert_eq!(apk.unwrap().schema(), asset::FILE_SELECTOR);

        let fingerprint = registry.resolve("v3.fingerprint.domain_name.library");
        assert_eq!(fingerprint.unwrap().schema(), FINGERPRINT_LIBRARY_SELECTOR);

        let ip = registry.resolve("v3.asset.ip.v6");
        assert_eq!(ip.unwrap().schema(), "v3.asset.ip");

        let report = registry.resolve("v3.report.vulnerability");
        assert_eq!(report.unwrap().schema(), "json");

        assert!(SchemaRegistry::new().resolve("v3.asset.file").is_none());
    }

    #[test]
    fn test_fingerprint_encode_decode() {
        let registry = SchemaRegistry::v3();
        let value = json!({
            "domain_name": "ostorlab.co",
            "library_name": "jquery",
            "library_version": "3.6.0",
            "library_type": "JAVASCRIPT_LIBRARY"
        });
        let bytes = registry.encode(FINGERPRINT_LIBRARY_SELECTOR, &value).unwrap();
        let decoded = registry.decode(FINGERPRINT_LIBRARY_SELECTOR, &bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_fingerprint_requires_library_type() {
        let registry = SchemaRegistry::v3();
        let value = json!({"domain_name": "ostorlab.co", "library_name": "jquery"});
        assert!(matches!(
            registry.encode(FINGERPRINT_LIBRARY_SELECTOR, &value),
            Err(WireError::Encode { .. })
        ));
    }

    #[test]
    fn test_bytes_render_as_base64() {
        let registry = SchemaRegistry::v3();
        let bytes = encode_asset(&Asset::File(FileAsset::from_content(b"hello".to_vec())));
        let value = registry.decode("v3.asset.file", &bytes).unwrap();
        assert_eq!(value, json!({"content": "aGVsbG8="}));
    }

    #[test]
    fn test_render_bytes_reaches_nested_fields() {
        let registry = SchemaRegistry::v3();
        let text = |raw: &[u8]| String::from_utf8_lossy(raw).into_owned();

        let mut file = json!({"content": "aGVsbG8=", "path": "/tmp/a"});
        registry.render_bytes("v3.asset.file.android.apk", &mut file, &text);
        assert_eq!(file, json!({"content": "hello", "path": "/tmp/a"}));

        let mut start = json!({
            "key": "agentgroup/org/web",
            "agents": [{"key": "agent/org/nmap", "args": [{"name": "ports", "type": "string", "value": "WzQ0M10="}]}],
            "file": {"content": "aGk="}
        });
        registry.render_bytes(START_AGENT_SCAN_SELECTOR, &mut start, &text);
        assert_eq!(start["agents"][0]["args"][0]["value"], json!("[443]"));
        assert_eq!(start["file"]["content"], json!("hi"));

        let mut domain = json!({"name": "aGVsbG8="});
        registry.render_bytes("v3.asset.domain_name", &mut domain, &text);
        assert_eq!(domain, json!({"name": "aGVsbG8="}));
    }

    #[test]
    fn test_decode_garbage_is_an_error() {
        let registry = SchemaRegistry::v3();
        assert!(registry.decode("v3.asset.domain_name", &[0xff, 0xff, 0xff]).is_err());
        assert!(registry.decode("v3.report.x", b"not json").is_err());
    }

    #[test]
    fn test_asset_payloads_decode_to_the_same_asset() {
        let assets = vec![
            Asset::domain("ostorlab.co"),
            Asset::ip("192.168.1.0/24").unwrap(),
            Asset::ip("2001:db8::1").unwrap(),
            Asset::link("https://ostorlab.co/login"),
            Asset::AndroidApk(FileAsset::from_content(b"PK\x03\x04".to_vec())),
            Asset::IosStore {
                bundle_id: "co.ostorlab.app".to_string(),
            },
        ];
        for asset in assets {
            let decoded = decode_asset(asset.selector(), &encode_asset(&asset)).unwrap();
            assert_eq!(decoded, asset);
        }
    }
}
