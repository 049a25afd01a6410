//! Deployment target models

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

/// Protocol used to reach the application server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployChannel {
    #[default]
    Http,
    Https,
}

impl DeployChannel {
    pub fn scheme(&self) -> &'static str {
        match self {
            DeployChannel::Http => "http",
            DeployChannel::Https => "https",
        }
    }
}

/// Credentials for the application server
#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,

    #[serde(deserialize_with = "deserialize_secret")]
    pub password: SecretString,
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(SecretString::from(raw))
}

/// A deployment target
#[derive(Debug, Deserialize)]
pub struct Environment {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub host: String,

    pub port: u16,

    #[serde(default)]
    pub credentials: Option<Credentials>,

    #[serde(default)]
    pub channel: DeployChannel,

    /// Deployments require an explicit production confirmation
    #[serde(default)]
    pub production: bool,
}

impl Environment {
    /// Environment without credentials, mostly useful for wiring tests
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            host: host.into(),
            port,
            credentials: None,
            channel: DeployChannel::Http,
            production: false,
        }
    }

    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }
}
