//! Endpoint paths for one instance.

/// Name plus API prefix of one instance, and the paths derived from them.
///
/// Paths are rebuilt on every call; nothing is cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmEndpoints {
    base: String,
    name: String,
    bridge: String,
}

impl VmEndpoints {
    /// `base` is the API prefix, e.g. `/1.0`.
    pub fn new(base: impl Into<String>, name: impl Into<String>, bridge: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            name: name.into(),
            bridge: bridge.into(),
        }
    }

    /// `{base}/virtual-machines`
    #[must_use]
    pub fn collection(&self) -> String {
        format!("{}/virtual-machines", self.base)
    }

    /// `{base}/virtual-machines/{name}`
    #[must_use]
    pub fn instance(&self) -> String {
        format!("{}/virtual-machines/{}", self.base, self.name)
    }

    /// `{base}/virtual-machines/{name}/state`
    #[must_use]
    pub fn state(&self) -> String {
        format!("{}/state", self.instance())
    }

    /// `{base}/instances/{name}`, the generic instance view that carries the
    /// full device list.
    #[must_use]
    pub fn devices(&self) -> String {
        format!("{}/instances/{}", self.base, self.name)
    }

    /// `{base}/networks/{bridge}/leases`
    #[must_use]
    pub fn network_leases(&self) -> String {
        format!("{}/networks/{}/leases", self.base, self.bridge)
    }
}
