use crate::codec::frame::Encap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, Ipv6Addr};

/// IP parameters exchanged between host and negotiation
///
/// The host fills in what it wants before the session starts; negotiation
/// overwrites the MTU with whatever the gateway announces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpInfo {
    #[serde(default)]
    pub mtu: u16,

    // desired IPv4 address, requested via IPCP option 3
    pub addr: Option<Ipv4Addr>,

    // desired IPv6 address; its low 64 bits become the IP6CP interface id
    pub addr6: Option<Ipv6Addr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    #[serde(default = "default_encap")]
    pub encap: Encap,

    #[serde(default = "default_want_ipv4")]
    pub want_ipv4: bool,

    #[serde(default)]
    pub want_ipv6: bool,

    // heartbeat interval in seconds, 0 disables
    #[serde(default = "default_keep_alive_interval")]
    pub keep_alive_interval: u64,

    // dead peer detection interval in seconds, 0 disables
    #[serde(default = "default_dpd_interval")]
    pub dpd_interval: u64,

    #[serde(default)]
    pub ip: IpInfo,
}

fn default_encap() -> Encap {
    Encap::F5
}

fn default_want_ipv4() -> bool {
    true
}

fn default_keep_alive_interval() -> u64 {
    10
}

fn default_dpd_interval() -> u64 {
    60
}

pub fn load(path: &str) -> anyhow::Result<TunnelConfig> {
    let content = fs::read_to_string(path)?;
    let config: TunnelConfig = toml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg: TunnelConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.encap, Encap::F5);
        assert!(cfg.want_ipv4);
        assert!(!cfg.want_ipv6);
        assert_eq!(cfg.keep_alive_interval, 10);
        assert_eq!(cfg.ip.mtu, 0);
    }

    #[test]
    fn parses_a_full_config() {
        let cfg: TunnelConfig = toml::from_str(
            r#"
            encap = "f5hdlc"
            want_ipv6 = true
            dpd_interval = 30

            [ip]
            mtu = 1400
            addr = "10.0.0.2"
            addr6 = "fe80::11:2233:4455:6677"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.encap, Encap::F5Hdlc);
        assert!(cfg.want_ipv6);
        assert_eq!(cfg.dpd_interval, 30);
        assert_eq!(cfg.ip.addr, Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert!(cfg.ip.addr6.is_some());
    }
}
