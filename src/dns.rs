//! Global name/address resolution (spec §3 `DNS`). Read-only after boot,
//! so it is shared unlocked (spec §5 "shared global resources").

use rustc_hash::FxHashMap;
use std::net::Ipv4Addr;

#[derive(Debug, Default)]
pub struct Dns {
    name_to_addr: FxHashMap<String, Ipv4Addr>,
    addr_to_name: FxHashMap<Ipv4Addr, String>,
}

impl Dns {
    pub fn new() -> Self {
        let mut dns = Self::default();
        dns.register("localhost".into(), Ipv4Addr::LOCALHOST)
            .expect("loopback registers once");
        dns
    }

    /// Bijective on success: fails if either the name or the address is
    /// already registered to something else.
    pub fn register(&mut self, name: String, addr: Ipv4Addr) -> anyhow::Result<()> {
        if let Some(existing) = self.name_to_addr.get(&name) {
            if *existing != addr {
                anyhow::bail!("name `{name}` already registered to {existing}");
            }
            return Ok(());
        }
        if let Some(existing) = self.addr_to_name.get(&addr) {
            if *existing != name {
                anyhow::bail!("address {addr} already registered to `{existing}`");
            }
            return Ok(());
        }
        self.name_to_addr.insert(name.clone(), addr);
        self.addr_to_name.insert(addr, name);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<Ipv4Addr> {
        self.name_to_addr.get(name).copied()
    }

    pub fn reverse(&self, addr: Ipv4Addr) -> Option<&str> {
        self.addr_to_name.get(&addr).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_is_preregistered() {
        let dns = Dns::new();
        assert_eq!(dns.resolve("localhost"), Some(Ipv4Addr::LOCALHOST));
        assert_eq!(dns.reverse(Ipv4Addr::LOCALHOST), Some("localhost"));
    }

    #[test]
    fn rejects_conflicting_registration() {
        let mut dns = Dns::new();
        dns.register("a".into(), Ipv4Addr::new(10, 0, 0, 1)).unwrap();
        assert!(dns.register("a".into(), Ipv4Addr::new(10, 0, 0, 2)).is_err());
        assert!(dns
            .register("b".into(), Ipv4Addr::new(10, 0, 0, 1))
            .is_err());
    }

    #[test]
    fn repeat_registration_of_same_pair_is_idempotent() {
        let mut dns = Dns::new();
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        dns.register("a".into(), ip).unwrap();
        dns.register("a".into(), ip).unwrap();
    }
}
