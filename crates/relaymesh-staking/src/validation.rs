//! Stateless checks shared by the stake handlers

use relaymesh_core::constants::{GEO_ZONE_LENGTH, MAX_SERVICE_URL_LEN, NETWORK_IDENTIFIER_LENGTH};
use relaymesh_core::error::{Result, StakingError};
use relaymesh_core::types::{ChainId, ConsensusParams, GeoZone, PublicKey};
use std::collections::BTreeSet;

/// Parse a chain set: non-empty, no duplicates, at most `max` entries
pub fn parse_chains(chains: &[String], max: u64) -> Result<Vec<ChainId>> {
    if chains.is_empty() {
        return Err(StakingError::InvalidNetworkIdentifier("no chains".into()));
    }
    let mut seen = BTreeSet::new();
    for chain in chains {
        if !seen.insert(chain.to_ascii_lowercase()) {
            return Err(StakingError::DuplicateChain(chain.clone()));
        }
    }
    if chains.len() as u64 > max {
        return Err(StakingError::ChainLimitExceeded {
            count: chains.len(),
            max,
        });
    }
    chains
        .iter()
        .map(|c| ChainId::parse(c, NETWORK_IDENTIFIER_LENGTH))
        .collect()
}

/// Parse a geo-zone set: no duplicates, at most `max` entries
pub fn parse_geo_zones(zones: &[String], max: u64) -> Result<Vec<GeoZone>> {
    if zones.len() as u64 > max {
        return Err(StakingError::GeoZoneLimitExceeded { count: zones.len(), max });
    }
    let parsed = zones
        .iter()
        .map(|z| GeoZone::parse(z, GEO_ZONE_LENGTH))
        .collect::<Result<Vec<_>>>()?;
    let unique: BTreeSet<_> = parsed.iter().collect();
    if unique.len() != parsed.len() {
        return Err(StakingError::InvalidGeoZone("duplicate geo zone".into()));
    }
    Ok(parsed)
}

/// `http(s)://host.tld:port[/path]` with a single port, at most 255 chars
pub fn validate_service_url(url: &str) -> Result<()> {
    let invalid = |reason: &str| Err(StakingError::InvalidServiceUrl(format!("{url}: {reason}")));

    if url.len() > MAX_SERVICE_URL_LEN {
        return invalid("too long");
    }
    let rest = match url.split_once("://") {
        Some(("http", rest)) | Some(("https", rest)) => rest,
        _ => return invalid("scheme must be http or https"),
    };
    let authority = rest.split('/').next().unwrap_or_default();
    let mut parts = authority.split(':');
    let (Some(host), Some(port), None) = (parts.next(), parts.next(), parts.next()) else {
        return invalid("exactly one port is required");
    };
    if host.is_empty() || !host.contains('.') {
        return invalid("host must contain a dot");
    }
    if port.is_empty() || port.parse::<u16>().is_err() {
        return invalid("port must be within 0..=65535");
    }
    Ok(())
}

/// Structural key check plus the consensus accepted-types list
pub fn validate_public_key(key: &PublicKey, consensus: &ConsensusParams) -> Result<()> {
    key.validate()?;
    if !consensus.accepts(key.key_type()) {
        return Err(StakingError::InvalidPublicKeyType(key.key_type().name().to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymesh_core::types::PublicKeyType;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_service_urls() {
        assert!(validate_service_url("https://x.io:443").is_ok());
        assert!(validate_service_url("http://node.example.com:8081/relay").is_ok());
        assert!(validate_service_url("https://x.io:0").is_ok());

        for bad in [
            "ftp://x.io:21",
            "https://x.io",
            "https://x.io:443:80",
            "https://localhost:443",
            "https://x.io:65536",
            "https://x.io:",
            "x.io:443",
        ] {
            assert!(
                matches!(validate_service_url(bad), Err(StakingError::InvalidServiceUrl(_))),
                "{bad} accepted"
            );
        }
        let long = format!("https://{}.io:443", "a".repeat(250));
        assert!(validate_service_url(&long).is_err());
    }

    #[test]
    fn test_chain_rules() {
        assert_eq!(parse_chains(&strings(&["0001", "0002"]), 15).unwrap().len(), 2);
        assert!(matches!(
            parse_chains(&strings(&["0001", "0001"]), 15),
            Err(StakingError::DuplicateChain(_))
        ));
        assert!(matches!(
            parse_chains(&strings(&["0001", "0002"]), 1),
            Err(StakingError::ChainLimitExceeded { count: 2, max: 1 })
        ));
        assert!(matches!(
            parse_chains(&strings(&["000102"]), 15),
            Err(StakingError::InvalidNetworkIdentifier(_))
        ));
        assert!(parse_chains(&[], 15).is_err());
    }

    #[test]
    fn test_geo_zone_rules() {
        assert!(parse_geo_zones(&[], 5).unwrap().is_empty());
        assert!(matches!(
            parse_geo_zones(&strings(&["zz"]), 5),
            Err(StakingError::InvalidGeoZone(_))
        ));
        assert!(matches!(
            parse_geo_zones(&strings(&["01", "02"]), 1),
            Err(StakingError::GeoZoneLimitExceeded { .. })
        ));
    }

    #[test]
    fn test_public_key_type_gate() {
        let key = PublicKey::new(PublicKeyType::Secp256k1, [&[0x02u8][..], &[7u8; 32][..]].concat()).unwrap();
        let err = validate_public_key(&key, &ConsensusParams::default()).unwrap_err();
        assert_eq!(err, StakingError::InvalidPublicKeyType("secp256k1".into()));
    }
}
