//! Execution routes: run locally, or have a proxy host run the command.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use shell_escape::unix::escape;

/// Intermediate host that relays operations to hosts without a direct route.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProxyTarget {
    /// Address reachable from the orchestrating machine.
    pub address: String,
    /// Local path of the private key accepted by the proxy.
    pub key_path: Utf8PathBuf,
}

impl ProxyTarget {
    /// Creates a proxy description.
    #[must_use]
    pub fn new(address: impl Into<String>, key_path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            address: address.into(),
            key_path: key_path.into(),
        }
    }
}

/// How a command is spawned.
///
/// `Direct` starts the client as a local subprocess. `ViaProxy` sends the
/// same client invocation to the proxy as a single remote command, so the
/// proxy opens the onward connection.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub enum Route {
    /// Run the client on the orchestrating machine.
    #[default]
    Direct,
    /// Run the client on a proxy host.
    ViaProxy {
        /// Local private key accepted by the proxy.
        key_path: Utf8PathBuf,
        /// Address of the proxy.
        host: String,
    },
}

impl Route {
    /// Builds the indirected route through `proxy`.
    #[must_use]
    pub fn through(proxy: &ProxyTarget) -> Self {
        Self::ViaProxy {
            key_path: proxy.key_path.clone(),
            host: proxy.address.clone(),
        }
    }

    /// Builds the route for an optional proxy.
    #[must_use]
    pub fn for_proxy(proxy: Option<&ProxyTarget>) -> Self {
        proxy.map_or(Self::Direct, Self::through)
    }

    /// Returns the proxy key when the route is indirected.
    #[must_use]
    pub fn proxy_key(&self) -> Option<&Utf8Path> {
        match self {
            Self::Direct => None,
            Self::ViaProxy { key_path, .. } => Some(key_path),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::ViaProxy { host, .. } => write!(f, "via {host}"),
        }
    }
}

/// Renders `program` and `args` as one shell command string.
///
/// Each argument is escaped for a POSIX shell, so arguments with whitespace
/// or quotes survive the extra shell hop on the proxy.
pub(crate) fn render_remote_command(program: &str, args: &[String]) -> String {
    let mut rendered = String::from(program);
    for arg in args {
        rendered.push(' ');
        rendered.push_str(escape(arg.as_str().into()).as_ref());
    }
    rendered
}
