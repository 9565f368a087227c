use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterKind {
    Gateway,
    Core,
    Access,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterLocation {
    Hq,
    Branch,
    Datacenter,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterRole {
    Gateway,
    Distribution,
    Server,
    Wifi,
    Dmz,
    Lab,
    None,
}

/// Classification and capability flags carried in a facts file's `metadata`
/// section. Only `linux`, `kind == Gateway`, and `ansible_controller` affect
/// path discovery; the rest is inventory data passed through for callers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RouterMetadata {
    pub linux: bool,
    #[serde(rename = "type")]
    pub kind: RouterKind,
    pub location: RouterLocation,
    pub role: RouterRole,
    pub vendor: String,
    pub manageable: bool,
    pub ansible_controller: bool,
}

impl Default for RouterMetadata {
    fn default() -> Self {
        Self {
            linux: true,
            kind: RouterKind::None,
            location: RouterLocation::None,
            role: RouterRole::None,
            vendor: "linux".to_string(),
            manageable: true,
            ansible_controller: false,
        }
    }
}

impl RouterMetadata {
    pub fn is_gateway(&self) -> bool {
        self.kind == RouterKind::Gateway
    }
}
