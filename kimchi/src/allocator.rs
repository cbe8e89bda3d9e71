//! Port and name allocation for one harness run.
//!
//! A single value threaded through every config builder. Ports are strictly
//! increasing; names are counted per node kind.

use crate::error::ConfigGenerationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Mix,
    Provider,
}

impl NodeKind {
    pub fn is_provider(self) -> bool {
        matches!(self, Self::Provider)
    }

    fn prefix(self) -> &'static str {
        match self {
            Self::Mix => "node",
            Self::Provider => "provider",
        }
    }
}

#[derive(Debug)]
pub struct Allocator {
    // u32 so that exhaustion is an error rather than a wrap.
    next_port: u32,
    mixes: usize,
    providers: usize,
}

impl Allocator {
    /// The first port handed out is `base_port + 1`.
    pub fn new(base_port: u16) -> Self {
        Self { next_port: u32::from(base_port) + 1, mixes: 0, providers: 0 }
    }

    pub fn next_port(&mut self) -> Result<u16, ConfigGenerationError> {
        let port = u16::try_from(self.next_port)
            .map_err(|_| ConfigGenerationError::PortsExhausted(self.next_port))?;
        self.next_port += 1;
        Ok(port)
    }

    /// `node-{k}` or `provider-{k}`, `k` counting from zero per kind.
    pub fn next_name(&mut self, kind: NodeKind) -> String {
        let counter = match kind {
            NodeKind::Mix => &mut self.mixes,
            NodeKind::Provider => &mut self.providers,
        };
        let name = format!("{}-{}", kind.prefix(), counter);
        *counter += 1;
        name
    }

    pub fn allocated(&self, kind: NodeKind) -> usize {
        match kind {
            NodeKind::Mix => self.mixes,
            NodeKind::Provider => self.providers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_start_after_base() -> Result<(), ConfigGenerationError> {
        let mut a = Allocator::new(30000);
        assert_eq!(a.next_port()?, 30001);
        assert_eq!(a.next_port()?, 30002);
        Ok(())
    }

    #[test]
    fn names_count_per_kind() {
        let mut a = Allocator::new(30000);
        assert_eq!(a.next_name(NodeKind::Provider), "provider-0");
        assert_eq!(a.next_name(NodeKind::Mix), "node-0");
        assert_eq!(a.next_name(NodeKind::Provider), "provider-1");
        assert_eq!(a.allocated(NodeKind::Mix), 1);
        assert_eq!(a.allocated(NodeKind::Provider), 2);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let mut a = Allocator::new(u16::MAX - 1);
        assert!(a.next_port().is_ok());
        assert!(matches!(a.next_port(), Err(ConfigGenerationError::PortsExhausted(65536))));
    }
}
