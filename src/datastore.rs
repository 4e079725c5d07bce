//! NETCONF configuration datastores (RFC 6241 section 5.1)

use serde::{Deserialize, Serialize};

use crate::hello::{CANDIDATE, STARTUP, WRITABLE_RUNNING};
use crate::node::ConfigNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Datastore {
    Running,
    Candidate,
    Startup,
}

impl Datastore {
    /// Element name used inside `<target>` and `<source>`
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Candidate => "candidate",
            Self::Startup => "startup",
        }
    }

    /// Capability the device must advertise before this datastore can be read at all
    pub fn read_capability(self) -> Option<&'static str> {
        match self {
            Self::Running => None,
            Self::Candidate => Some(CANDIDATE),
            Self::Startup => Some(STARTUP),
        }
    }

    /// Capability the device must advertise before edit-config may target this datastore
    pub fn write_capability(self) -> &'static str {
        match self {
            Self::Running => WRITABLE_RUNNING,
            Self::Candidate => CANDIDATE,
            Self::Startup => STARTUP,
        }
    }

    /// `<running/>`, `<candidate/>` or `<startup/>` for target/source elements
    pub fn to_node(self) -> ConfigNode {
        ConfigNode::empty(self.as_str())
    }
}

impl std::fmt::Display for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Datastore {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "candidate" => Ok(Self::Candidate),
            "startup" => Ok(Self::Startup),
            other => Err(format!("unknown datastore {:?}", other)),
        }
    }
}
