// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// v3 message schemas.
//
// Field numbers and labels follow the published proto2 definitions; they are
// a fixed contract with agents written in other languages.

use super::base64_bytes;
use serde::{Deserialize, Serialize};

/// `v3.asset.file` and every file-like asset below it.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct File {
    #[prost(bytes = "vec", optional, tag = "1")]
    #[serde(default, with = "base64_bytes::option", skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<u8>>,
    #[prost(string, optional, tag = "2")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[prost(string, optional, tag = "3")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
}

/// `v3.asset.domain_name`
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct DomainName {
    #[prost(string, required, tag = "1")]
    pub name: String,
}

/// `v3.asset.ip.v4` and `v3.asset.ip.v6`
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct Ip {
    #[prost(string, required, tag = "1")]
    pub host: String,
    #[prost(string, optional, tag = "2")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
    #[prost(int32, optional, tag = "3")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
}

/// `v3.asset.link`
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct Link {
    #[prost(string, required, tag = "1")]
    pub url: String,
    #[prost(string, required, tag = "2")]
    pub method: String,
}

/// `v3.asset.store.android_store`
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct AndroidStore {
    #[prost(string, required, tag = "1")]
    pub package_name: String,
}

/// `v3.asset.store.ios_store`
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct IosStore {
    #[prost(string, required, tag = "1")]
    pub bundle_id: String,
}

/// `v3.fingerprint.domain_name.library`
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct DomainLibraryFingerprint {
    #[prost(string, required, tag = "1")]
    pub domain_name: String,
    #[prost(string, required, tag = "2")]
    pub library_name: String,
    #[prost(string, optional, tag = "3")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_version: Option<String>,
    #[prost(string, required, tag = "4")]
    pub library_type: String,
}

/// Typed agent argument; `value` holds the JSON-encoded value.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct Arg {
    #[prost(string, required, tag = "1")]
    pub name: String,
    #[prost(string, required, tag = "2")]
    pub r#type: String,
    #[prost(bytes = "vec", required, tag = "3")]
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct AgentSpec {
    #[prost(string, required, tag = "1")]
    pub key: String,
    #[prost(string, optional, tag = "2")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[prost(int32, optional, tag = "3")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[prost(message, repeated, tag = "4")]
    #[serde(default)]
    pub args: Vec<Arg>,
}

/// `v3.control.start_agent_scan`: request to run an agent group against one
/// asset.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct StartAgentScan {
    #[prost(int32, optional, tag = "1")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_scan_id: Option<i32>,
    #[prost(string, required, tag = "2")]
    pub key: String,
    #[prost(message, repeated, tag = "3")]
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
    #[prost(message, optional, tag = "4")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android_apk: Option<File>,
    #[prost(message, optional, tag = "5")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android_aab: Option<File>,
    #[prost(message, optional, tag = "6")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ios_ipa: Option<File>,
    #[prost(message, optional, tag = "7")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<File>,
    #[prost(message, optional, tag = "8")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<DomainName>,
    #[prost(message, optional, tag = "9")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<Link>,
}
