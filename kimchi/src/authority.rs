//! Authority config generation and the static peer exchange.

use std::collections::BTreeMap;
use std::path::Path;

use nyx_control::authority::{Authority, AuthorityDebug, Parameters};
use nyx_control::{AuthorityConfig, AuthorityPeer, Logging};
use nyx_crypto::{IdentityKeyPair, IdentityPublicKey};
use tracing::debug;

use crate::allocator::Allocator;
use crate::error::ConfigGenerationError;

/// File name every server logs to inside its data dir.
pub const SERVER_LOG: &str = "nyx.log";

/// Build `n` authority configs whose peer lists hold every other authority.
///
/// First pass allocates ports and keys; the second hands each authority the
/// records of all the others, compared by identity key.
pub fn build_authorities(
    n: usize,
    alloc: &mut Allocator,
    base_dir: &Path,
    log_level: &str,
) -> Result<Vec<AuthorityConfig>, ConfigGenerationError> {
    let mut configs = Vec::with_capacity(n);
    let mut records: BTreeMap<IdentityPublicKey, AuthorityPeer> = BTreeMap::new();

    for i in 0..n {
        let port = alloc.next_port()?;
        let cfg = AuthorityConfig {
            authority: Authority {
                identifier: format!("authority-{i}.example.org"),
                addresses: vec![format!("127.0.0.1:{port}")],
                data_dir: base_dir.join(format!("authority{i}")),
            },
            logging: Logging::to_file(SERVER_LOG, log_level),
            parameters: Parameters {
                mix_lambda: 1.0,
                mix_max_delay: 10_000,
                send_lambda: 123.0,
                send_shift: 12,
                send_max_interval: 123_456,
            },
            debug: AuthorityDebug {
                identity_key: IdentityKeyPair::generate()?,
                layers: 3,
                min_nodes_per_layer: 1,
                generate_only: false,
            },
            authorities: vec![],
            providers: vec![],
            mixes: vec![],
        };
        records.insert(cfg.identity(), cfg.peer_record());
        configs.push(cfg);
    }

    for cfg in &mut configs {
        let own = cfg.identity();
        cfg.authorities =
            records.iter().filter(|(k, _)| **k != own).map(|(_, r)| r.clone()).collect();
        cfg.fixup_and_validate()?;
        debug!(
            authority = %cfg.authority.identifier,
            peers = cfg.authorities.len(),
            "authority config ready"
        );
    }
    Ok(configs)
}
