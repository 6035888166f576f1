//! Host descriptions handed over by the provisioning collaborator.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::deployment::{Bundle, DeploymentRequest};
use crate::remote::ProxyTarget;

/// A provisioned instance and the key it accepts.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Host {
    /// Address reachable from the orchestrating machine.
    pub public_address: String,
    /// Address on the private subnet.
    pub private_address: String,
    /// Local private key accepted by the instance.
    pub key_path: Utf8PathBuf,
}

impl Host {
    /// Describes this host as a proxy for others.
    #[must_use]
    pub fn as_proxy(&self) -> ProxyTarget {
        ProxyTarget::new(self.public_address.clone(), self.key_path.clone())
    }

    /// Builds the request that deploys `bundle` onto this host.
    ///
    /// Without a proxy the host is addressed publicly. Behind `proxy` it is
    /// addressed on the private subnet and reached through the proxy's
    /// public address.
    #[must_use]
    pub fn deployment_request(&self, bundle: Bundle, proxy: Option<&Self>) -> DeploymentRequest {
        match proxy {
            None => DeploymentRequest::new(bundle, self.public_address.clone(), self.key_path.clone()),
            Some(bastion) => {
                DeploymentRequest::new(bundle, self.private_address.clone(), self.key_path.clone())
                    .via(bastion.as_proxy())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(public: &str, private: &str, key: &str) -> Host {
        Host {
            public_address: public.to_owned(),
            private_address: private.to_owned(),
            key_path: Utf8PathBuf::from(key),
        }
    }

    #[test]
    fn direct_host_is_addressed_publicly() {
        let bastion = host("203.0.113.10", "10.0.1.9", "out/keys/bastion");

        let request = bastion.deployment_request(Bundle::new("bundle-abc.js"), None);

        assert_eq!(request.address, "203.0.113.10");
        assert_eq!(request.key_path, Utf8PathBuf::from("out/keys/bastion"));
        assert!(request.proxy.is_none());
    }

    #[test]
    fn interior_host_routes_through_bastion() {
        let bastion = host("203.0.113.10", "10.0.1.9", "out/keys/bastion");
        let interior = host("", "10.0.2.7", "out/keys/interior");

        let request = interior.deployment_request(Bundle::new("bundle-abc.js"), Some(&bastion));

        assert_eq!(request.address, "10.0.2.7");
        assert_eq!(request.key_path, Utf8PathBuf::from("out/keys/interior"));
        assert_eq!(
            request.proxy,
            Some(ProxyTarget::new("203.0.113.10", "out/keys/bastion"))
        );
    }
}
