//! Mix and provider config generation.

use std::collections::BTreeMap;
use std::path::Path;

use nyx_control::node::{Management, NodeDebug, Pki, Provider, Server, Voting};
use nyx_control::{AuthorityConfig, Kaetzchen, Logging, NodeConfig, Peer};
use nyx_crypto::IdentityKeyPair;
use tracing::debug;

use crate::allocator::{Allocator, NodeKind};
use crate::authority::SERVER_LOG;
use crate::error::ConfigGenerationError;

/// Build one node config trusting every authority in `authorities`.
///
/// `voting == false` is refused before anything is allocated.
pub fn build_node(
    kind: NodeKind,
    voting: bool,
    authorities: &[AuthorityConfig],
    alloc: &mut Allocator,
    base_dir: &Path,
    log_level: &str,
) -> Result<NodeConfig, ConfigGenerationError> {
    if !voting {
        return Err(ConfigGenerationError::NonVotingUnsupported);
    }
    let mut peers = Vec::with_capacity(authorities.len());
    for a in authorities {
        if a.authority.addresses.is_empty() {
            let id = a.authority.identifier.clone();
            return Err(ConfigGenerationError::AuthorityWithoutAddress(id));
        }
        peers.push(Peer::from(&a.peer_record()));
    }

    let port = alloc.next_port()?;
    let name = alloc.next_name(kind);
    let provider = kind.is_provider().then(|| Provider {
        alt_addresses: BTreeMap::from([
            ("TCP".to_string(), vec![format!("localhost:{port}")]),
            ("torv2".to_string(), vec!["onedaythiswillbea.onion:2323".to_string()]),
        ]),
        kaetzchen: vec![Kaetzchen::new("loop", "+loop")],
    });

    let mut cfg = NodeConfig {
        server: Server {
            identifier: format!("{name}.eXaMpLe.org"),
            addresses: vec![format!("127.0.0.1:{port}")],
            data_dir: base_dir.join(&name),
            is_provider: kind.is_provider(),
        },
        logging: Logging::to_file(SERVER_LOG, log_level),
        debug: NodeDebug { identity_key: IdentityKeyPair::generate()?, num_sphinx_workers: 1 },
        pki: Pki { voting: Some(Voting { peers }) },
        management: Management { enable: kind.is_provider(), path: None },
        provider,
    };
    cfg.fixup_and_validate()?;
    debug!(node = %cfg.server.identifier, port, "node config ready");
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::build_authorities;

    #[test]
    fn provider_gets_alt_addresses_and_loop_service() -> Result<(), ConfigGenerationError> {
        let base = Path::new("/tmp/kimchi");
        let mut alloc = Allocator::new(30000);
        let auths = build_authorities(2, &mut alloc, base, "DEBUG")?;
        let p = build_node(NodeKind::Provider, true, &auths, &mut alloc, base, "DEBUG")?;

        assert_eq!(p.server.identifier, "provider-0.eXaMpLe.org");
        assert_eq!(p.server.addresses, vec!["127.0.0.1:30003".to_string()]);
        assert_eq!(p.management_socket(), base.join("provider-0").join("management_sock"));
        let Some(section) = p.provider.as_ref() else { panic!("provider section missing") };
        assert_eq!(section.alt_addresses["TCP"], vec!["localhost:30003".to_string()]);
        assert_eq!(
            section.alt_addresses["torv2"],
            vec!["onedaythiswillbea.onion:2323".to_string()]
        );
        assert_eq!(section.kaetzchen, vec![Kaetzchen::new("loop", "+loop")]);
        Ok(())
    }

    #[test]
    fn mix_has_no_provider_section() -> Result<(), ConfigGenerationError> {
        let base = Path::new("/tmp/kimchi");
        let mut alloc = Allocator::new(30000);
        let auths = build_authorities(1, &mut alloc, base, "DEBUG")?;
        let m = build_node(NodeKind::Mix, true, &auths, &mut alloc, base, "DEBUG")?;
        assert_eq!(m.server.identifier, "node-0.eXaMpLe.org");
        assert!(m.provider.is_none());
        assert!(!m.management.enable);
        assert_eq!(m.debug.num_sphinx_workers, 1);
        Ok(())
    }

    #[test]
    fn non_voting_is_refused_without_side_effects() -> Result<(), ConfigGenerationError> {
        let base = Path::new("/tmp/kimchi");
        let mut alloc = Allocator::new(30000);
        let auths = build_authorities(1, &mut alloc, base, "DEBUG")?;
        let res = build_node(NodeKind::Mix, false, &auths, &mut alloc, base, "DEBUG");
        assert!(matches!(res, Err(ConfigGenerationError::NonVotingUnsupported)));
        assert_eq!(alloc.allocated(NodeKind::Mix), 0);
        assert_eq!(alloc.next_port()?, 30002);
        Ok(())
    }

    #[test]
    fn authority_without_address_is_fatal() -> Result<(), ConfigGenerationError> {
        let base = Path::new("/tmp/kimchi");
        let mut alloc = Allocator::new(30000);
        let mut auths = build_authorities(1, &mut alloc, base, "DEBUG")?;
        auths[0].authority.addresses.clear();
        let res = build_node(NodeKind::Mix, true, &auths, &mut alloc, base, "DEBUG");
        assert!(matches!(res, Err(ConfigGenerationError::AuthorityWithoutAddress(_))));
        Ok(())
    }
}
