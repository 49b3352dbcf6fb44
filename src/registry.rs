//! Publish-target policy for package registries
//!
//! Resolves where and how a project's artifact is published: default
//! visibility by package scope, and the credential shape the registry
//! host calls for. Private artifact hosts (CodeArtifact-style URLs) take
//! structured credentials instead of a plain token secret; the two are
//! mutually exclusive, as are static credential references and federated
//! identity.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Registry used when none is configured.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.npmjs.org/";

const DEFAULT_TOKEN_SECRET: &str = "NPM_TOKEN";
const DEFAULT_ACCESS_KEY_REF: &str = "AWS_ACCESS_KEY_ID";
const DEFAULT_SECRET_KEY_REF: &str = "AWS_SECRET_ACCESS_KEY";

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("Access level cannot be restricted for the unscoped package '{0}'")]
    InvalidAccessLevel(String),

    #[error("Incompatible auth configuration: {0}")]
    IncompatibleAuthMode(String),

    #[error("Federated-identity auth requires a role reference")]
    MissingRoleReference,
}

/// Visibility of the published artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Public,
    Restricted,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Public => "public",
            AccessLevel::Restricted => "restricted",
        }
    }
}

/// How credentials for a private artifact registry are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Static access/secret key pair referenced by secret names.
    #[default]
    KeyPair,
    /// Short-lived credentials through the host's identity provider;
    /// requires a role to assume.
    FederatedIdentity,
}

/// Credential configuration for private artifact registries. All fields
/// optional; defaults are derived at resolution time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrivateAuthOptions {
    pub mode: Option<AuthMode>,
    pub access_key_ref: Option<String>,
    pub secret_key_ref: Option<String>,
    pub role_to_assume: Option<String>,
}

impl PrivateAuthOptions {
    fn is_unset(&self) -> bool {
        self.mode.is_none()
            && self.access_key_ref.is_none()
            && self.secret_key_ref.is_none()
            && self.role_to_assume.is_none()
    }
}

/// Publish configuration surface. Everything defaults; see
/// [`PublishTarget::resolve`] for the derivation rules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishOptions {
    /// Registry URL; defaults to the public registry.
    pub registry_url: Option<String>,

    /// Explicit access level; defaults by package scope.
    pub access: Option<AccessLevel>,

    /// Secret reference holding a plain registry token. Only valid for
    /// non-private registries.
    pub token_secret: Option<String>,

    /// Structured credentials for private artifact registries.
    pub auth: PrivateAuthOptions,
}

/// Resolved credential shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryCredentials {
    /// Plain token held in the named secret.
    Token { secret: String },

    /// Static key pair for a private artifact host, optionally assuming
    /// a role after authentication.
    KeyPair {
        access_key_ref: String,
        secret_key_ref: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        role_to_assume: Option<String>,
    },

    /// Federated identity against a private artifact host.
    Federated { role_to_assume: String },
}

/// A fully resolved publish target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishTarget {
    pub package: String,

    /// Registry URL, normalized with a trailing slash.
    pub registry_url: String,

    /// Registry host and path, without the scheme.
    pub registry_host: String,

    pub access: AccessLevel,
    pub credentials: RegistryCredentials,
}

impl PublishTarget {
    /// Derives the effective publish target for a package.
    ///
    /// A scoped name (one containing `@`) defaults to restricted
    /// visibility; an unscoped name is public and cannot be restricted.
    pub fn resolve(package: &str, options: &PublishOptions) -> Result<Self, RegistryError> {
        let scoped = package.contains('@');
        let access = match options.access {
            Some(AccessLevel::Restricted) if !scoped => {
                return Err(RegistryError::InvalidAccessLevel(package.to_string()));
            }
            Some(level) => level,
            None if scoped => AccessLevel::Restricted,
            None => AccessLevel::Public,
        };

        let registry_url = normalize_url(
            options
                .registry_url
                .as_deref()
                .unwrap_or(DEFAULT_REGISTRY_URL),
        );
        let registry_host = strip_scheme(&registry_url).to_string();

        let credentials = if is_private_artifact_host(&registry_host) {
            if options.token_secret.is_some() {
                return Err(RegistryError::IncompatibleAuthMode(
                    "a plain token secret cannot be used with a private artifact registry".into(),
                ));
            }
            match options.auth.mode.unwrap_or_default() {
                AuthMode::KeyPair => RegistryCredentials::KeyPair {
                    access_key_ref: options
                        .auth
                        .access_key_ref
                        .clone()
                        .unwrap_or_else(|| DEFAULT_ACCESS_KEY_REF.to_string()),
                    secret_key_ref: options
                        .auth
                        .secret_key_ref
                        .clone()
                        .unwrap_or_else(|| DEFAULT_SECRET_KEY_REF.to_string()),
                    role_to_assume: options.auth.role_to_assume.clone(),
                },
                AuthMode::FederatedIdentity => {
                    if options.auth.access_key_ref.is_some()
                        || options.auth.secret_key_ref.is_some()
                    {
                        return Err(RegistryError::IncompatibleAuthMode(
                            "static credential references cannot be combined with federated identity"
                                .into(),
                        ));
                    }
                    let role = options
                        .auth
                        .role_to_assume
                        .clone()
                        .ok_or(RegistryError::MissingRoleReference)?;
                    RegistryCredentials::Federated {
                        role_to_assume: role,
                    }
                }
            }
        } else {
            if !options.auth.is_unset() {
                return Err(RegistryError::IncompatibleAuthMode(
                    "private-registry credentials require a private artifact registry".into(),
                ));
            }
            RegistryCredentials::Token {
                secret: options
                    .token_secret
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TOKEN_SECRET.to_string()),
            }
        };

        Ok(Self {
            package: package.to_string(),
            registry_url,
            registry_host,
            access,
            credentials,
        })
    }
}

fn normalize_url(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

fn strip_scheme(url: &str) -> &str {
    url.strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url)
}

/// Matches CodeArtifact-style private artifact hosts, e.g.
/// `my-domain-111122223333.d.codeartifact.us-west-2.amazonaws.com`.
fn is_private_artifact_host(host: &str) -> bool {
    host.contains(".codeartifact.") && host.contains(".amazonaws.com")
}
