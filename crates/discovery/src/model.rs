//! Typed views of the verified discovery documents.
//!
//! The JSON schema is owned by the discovery server. Parsing is lenient in
//! the places the server is allowed to evolve: unknown server types and
//! entries missing their type-specific field are skipped rather than
//! failing the whole list.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::DiscoveryError;

/// Which signed discovery document a value refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryList {
    Servers,
    Organizations,
}

impl fmt::Display for DiscoveryList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryList::Servers => write!(f, "server list"),
            DiscoveryList::Organizations => write!(f, "organization list"),
        }
    }
}

/// A string that is either language independent or keyed by language tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LanguageMappedString {
    ByLanguageTag(BTreeMap<String, String>),
    Any(String),
}

impl LanguageMappedString {
    /// Picks the best string for `locale` (a BCP 47 tag like `de-DE`).
    ///
    /// Order: exact tag, key starting with the tag, key starting with
    /// `<language>-`, `en-US`, any key starting with `en`, the lexically
    /// first key, then `"Unknown"`.
    pub fn resolve(&self, locale: &str) -> &str {
        let map = match self {
            LanguageMappedString::Any(value) => return value,
            LanguageMappedString::ByLanguageTag(map) => map,
        };

        let tag = if locale.is_empty() { "en" } else { locale };
        let language = tag.split('-').next().unwrap_or(tag);
        let language_prefix = format!("{}-", language);

        let find_prefix = |prefix: &str| {
            map.iter()
                .find(|(key, _)| key.starts_with(prefix))
                .map(|(_, value)| value.as_str())
        };

        map.get(tag)
            .map(String::as_str)
            .or_else(|| find_prefix(tag))
            .or_else(|| find_prefix(&language_prefix))
            .or_else(|| map.get("en-US").map(String::as_str))
            .or_else(|| find_prefix("en"))
            .or_else(|| map.values().next().map(String::as_str))
            .unwrap_or("Unknown")
    }
}

impl From<&str> for LanguageMappedString {
    fn from(value: &str) -> Self {
        LanguageMappedString::Any(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstituteAccessServer {
    pub base_url: String,
    pub display_name: LanguageMappedString,
    pub support_contact: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecureInternetServer {
    pub base_url: String,
    pub country_code: String,
    pub support_contact: Vec<String>,
}

/// Parsed `server_list.json`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawServerList")]
pub struct ServerList {
    pub version: Option<u64>,
    pub institute_access: Vec<InstituteAccessServer>,
    pub secure_internet: Vec<SecureInternetServer>,
}

#[derive(Deserialize)]
struct RawServerList {
    #[serde(default)]
    v: Option<u64>,
    server_list: Vec<RawServerEntry>,
}

#[derive(Deserialize)]
struct RawServerEntry {
    server_type: String,
    base_url: String,
    #[serde(default)]
    display_name: Option<LanguageMappedString>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    support_contact: Option<Vec<String>>,
}

impl From<RawServerList> for ServerList {
    fn from(raw: RawServerList) -> Self {
        let mut list = ServerList {
            version: raw.v,
            ..Default::default()
        };

        for entry in raw.server_list {
            let support_contact = entry.support_contact.unwrap_or_default();
            match entry.server_type.as_str() {
                "institute_access" => {
                    if let Some(display_name) = entry.display_name {
                        list.institute_access.push(InstituteAccessServer {
                            base_url: entry.base_url,
                            display_name,
                            support_contact,
                        });
                    }
                }
                "secure_internet" => {
                    if let Some(country_code) = entry.country_code {
                        list.secure_internet.push(SecureInternetServer {
                            base_url: entry.base_url,
                            country_code,
                            support_contact,
                        });
                    }
                }
                _ => {}
            }
        }

        list
    }
}

impl ServerList {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DiscoveryError> {
        serde_json::from_slice(bytes).map_err(|e| DiscoveryError::MalformedDiscoveryData {
            reason: format!("server list: {}", e),
        })
    }

    pub fn len(&self) -> usize {
        self.institute_access.len() + self.secure_internet.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finds the secure internet server an organization points at.
    pub fn secure_internet_home(&self, organization: &Organization) -> Option<&SecureInternetServer> {
        self.secure_internet
            .iter()
            .find(|server| server.base_url == organization.secure_internet_home)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub org_id: String,
    pub display_name: LanguageMappedString,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword_list: Option<LanguageMappedString>,
    pub secure_internet_home: String,
}

impl Organization {
    /// Case-insensitive match against display name and keywords.
    pub fn matches(&self, query: &str, locale: &str) -> bool {
        let query = query.to_lowercase();
        if self.display_name.resolve(locale).to_lowercase().contains(&query) {
            return true;
        }
        self.keyword_list
            .as_ref()
            .map(|keywords| keywords.resolve(locale).to_lowercase().contains(&query))
            .unwrap_or(false)
    }
}

/// Parsed `organization_list.json`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrganizationList {
    #[serde(rename = "v", default)]
    pub version: Option<u64>,
    #[serde(rename = "organization_list")]
    pub organizations: Vec<Organization>,
}

impl OrganizationList {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DiscoveryError> {
        serde_json::from_slice(bytes).map_err(|e| DiscoveryError::MalformedDiscoveryData {
            reason: format!("organization list: {}", e),
        })
    }

    pub fn search<'a>(&'a self, query: &'a str, locale: &'a str) -> impl Iterator<Item = &'a Organization> {
        self.organizations
            .iter()
            .filter(move |org| org.matches(query, locale))
    }
}

#[derive(Deserialize)]
struct VersionOnly {
    #[serde(default)]
    v: Option<u64>,
}

/// Reads the top-level `v` field of a discovery document.
pub fn discovery_version(bytes: &[u8]) -> Result<Option<u64>, DiscoveryError> {
    let parsed: VersionOnly =
        serde_json::from_slice(bytes).map_err(|e| DiscoveryError::MalformedDiscoveryData {
            reason: e.to_string(),
        })?;
    Ok(parsed.v)
}
