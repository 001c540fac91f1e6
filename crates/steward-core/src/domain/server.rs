use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declarative description of a managed server: a stable identifier plus the
/// endpoint used to reach (or spawn) it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// Unique identifier (e.g. "docs-indexer")
    pub id: String,

    /// Optional display name; falls back to `id` in log output
    pub name: Option<String>,

    /// Self-contained endpoint configuration
    pub endpoint: EndpointConfig,
}

impl ServerConfig {
    /// A server launched as a local subprocess speaking over stdio.
    pub fn stdio(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            endpoint: EndpointConfig::Stdio {
                command: command.into(),
                args: Vec::new(),
                env: HashMap::new(),
                cwd: None,
            },
        }
    }

    /// A server reached over HTTP.
    pub fn http(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            endpoint: EndpointConfig::Http {
                url: url.into(),
                headers: HashMap::new(),
            },
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_args<I, S>(mut self, new_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let EndpointConfig::Stdio { args, .. } = &mut self.endpoint {
            *args = new_args.into_iter().map(Into::into).collect();
        }
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let EndpointConfig::Stdio { env, .. } = &mut self.endpoint {
            env.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_cwd(mut self, dir: impl Into<String>) -> Self {
        if let EndpointConfig::Stdio { cwd, .. } = &mut self.endpoint {
            *cwd = Some(dir.into());
        }
        self
    }

    /// Display name for log output.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn endpoint_kind(&self) -> EndpointKind {
        self.endpoint.kind()
    }
}

/// How a managed server is reached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EndpointConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        cwd: Option<String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl EndpointConfig {
    pub fn kind(&self) -> EndpointKind {
        match self {
            EndpointConfig::Stdio { .. } => EndpointKind::Stdio,
            EndpointConfig::Http { .. } => EndpointKind::Http,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Stdio,
    Http,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Stdio => "stdio",
            EndpointKind::Http => "http",
        }
    }
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
