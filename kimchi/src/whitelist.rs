//! Provider/mix whitelist shared by every authority.

use nyx_control::{AuthorityConfig, NodeConfig, NodeEntry};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    /// Identifier and key of each provider.
    pub providers: Vec<NodeEntry>,
    /// Key only.
    pub mixes: Vec<NodeEntry>,
}

impl Whitelist {
    /// Partition `nodes` by their provider flag, keeping input order.
    pub fn from_nodes(nodes: &[NodeConfig]) -> Self {
        let mut wl = Self::default();
        for n in nodes {
            if n.is_provider() {
                wl.providers.push(NodeEntry {
                    identifier: Some(n.server.identifier.clone()),
                    identity_key: n.identity(),
                });
            } else {
                wl.mixes.push(NodeEntry { identifier: None, identity_key: n.identity() });
            }
        }
        wl
    }

    /// Give every authority its own copy of the lists.
    pub fn apply(&self, authorities: &mut [AuthorityConfig]) {
        for a in authorities {
            a.providers = self.providers.clone();
            a.mixes = self.mixes.clone();
        }
    }
}
