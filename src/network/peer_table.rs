//! Connection, trust and ban tables
//!
//! Plain synchronous state. The peer manager guards the whole table set with
//! one `RwLock`, so every method here runs under that lock and none of them
//! await.

use super::tcp_transport::PeerConnection;
use super::topic::Topic;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::IpAddr;

/// Result of penalising a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Penalty {
    /// Whitelisted peers are never penalised
    Exempt,
    /// Trust reduced, peer still trusted
    Reduced(u8),
    /// Trust exhausted or the peer was not trusted at all; ban it
    Exhausted,
}

pub struct PeerTable {
    connections: HashMap<Topic, HashMap<IpAddr, PeerConnection>>,
    trust: HashMap<IpAddr, u8>,
    /// ip -> unban unix timestamp
    bans: HashMap<IpAddr, u64>,
    whitelist: HashSet<IpAddr>,
    max_trust: u8,
}

impl PeerTable {
    pub fn new(max_trust: u8, whitelist: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            connections: Topic::ALL.iter().map(|t| (*t, HashMap::new())).collect(),
            trust: HashMap::new(),
            bans: HashMap::new(),
            whitelist: whitelist.into_iter().collect(),
            max_trust,
        }
    }

    pub fn is_whitelisted(&self, ip: &IpAddr) -> bool {
        self.whitelist.contains(ip)
    }

    pub fn whitelist(&self) -> impl Iterator<Item = &IpAddr> {
        self.whitelist.iter()
    }

    pub fn add_to_whitelist(&mut self, ip: IpAddr) {
        self.bans.remove(&ip);
        self.whitelist.insert(ip);
    }

    pub fn is_banned(&self, ip: &IpAddr, now: u64) -> bool {
        self.bans.get(ip).is_some_and(|&until| until > now)
    }

    pub fn ban_expiry(&self, ip: &IpAddr) -> Option<u64> {
        self.bans.get(ip).copied()
    }

    /// Ban `ip` until `until`, dropping its trust and every connection.
    ///
    /// Returns the removed connections for the caller to tear down, or `None`
    /// when the address is whitelisted.
    pub fn ban(&mut self, ip: IpAddr, until: u64) -> Option<Vec<PeerConnection>> {
        if self.is_whitelisted(&ip) {
            return None;
        }
        self.bans.insert(ip, until);
        self.trust.remove(&ip);
        Some(
            self.connections
                .values_mut()
                .filter_map(|by_ip| by_ip.remove(&ip))
                .collect(),
        )
    }

    pub fn unban(&mut self, ip: &IpAddr) -> bool {
        self.bans.remove(ip).is_some()
    }

    /// Forget bans that expired at or before `now`
    pub fn sweep_expired_bans(&mut self, now: u64) -> Vec<IpAddr> {
        let expired: Vec<IpAddr> = self
            .bans
            .iter()
            .filter(|(_, &until)| until <= now)
            .map(|(ip, _)| *ip)
            .collect();
        for ip in &expired {
            self.bans.remove(ip);
        }
        expired
    }

    pub fn trust_of(&self, ip: &IpAddr) -> Option<u8> {
        self.trust.get(ip).copied()
    }

    pub fn reset_trust(&mut self, ip: IpAddr) {
        self.trust.insert(ip, self.max_trust);
    }

    /// +1 up to the ceiling; untrusted peers are not promoted
    pub fn reward(&mut self, ip: &IpAddr) {
        if let Some(t) = self.trust.get_mut(ip) {
            *t = t.saturating_add(1).min(self.max_trust);
        }
    }

    /// -1; the entry is deleted when it reaches zero
    pub fn penalize(&mut self, ip: &IpAddr) -> Penalty {
        if self.is_whitelisted(ip) {
            return Penalty::Exempt;
        }
        match self.trust.get_mut(ip) {
            Some(t) if *t > 1 => {
                *t -= 1;
                Penalty::Reduced(*t)
            }
            Some(_) => {
                self.trust.remove(ip);
                Penalty::Exhausted
            }
            None => Penalty::Exhausted,
        }
    }

    pub fn connection(&self, topic: Topic, ip: &IpAddr) -> Option<&PeerConnection> {
        self.connections.get(&topic).and_then(|by_ip| by_ip.get(ip))
    }

    /// Store `conn`, returning the connection it replaced
    pub fn insert(&mut self, conn: PeerConnection) -> Option<PeerConnection> {
        self.connections
            .entry(conn.topic())
            .or_default()
            .insert(conn.ip(), conn)
    }

    /// Store `conn` only if the (topic, ip) slot still holds connection
    /// `expected` (`None` for an empty slot).
    ///
    /// Returns the replaced connection, or `Err` with the id of the connection
    /// that took the slot since `expected` was observed.
    pub fn insert_if_unchanged(
        &mut self,
        conn: PeerConnection,
        expected: Option<u64>,
    ) -> Result<Option<PeerConnection>, u64> {
        let current = self.connection(conn.topic(), &conn.ip()).map(|c| c.id());
        match current {
            Some(id) if current != expected => Err(id),
            _ => Ok(self.insert(conn)),
        }
    }

    /// Remove the entry for (topic, ip) only if it is still connection `id`
    pub fn remove_if(&mut self, topic: Topic, ip: &IpAddr, id: u64) -> Option<PeerConnection> {
        let by_ip = self.connections.get_mut(&topic)?;
        if by_ip.get(ip).map(|c| c.id()) == Some(id) {
            by_ip.remove(ip)
        } else {
            None
        }
    }

    pub fn peers(&self, topic: Topic) -> Vec<IpAddr> {
        self.connections
            .get(&topic)
            .map(|by_ip| by_ip.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn connections(&self, topic: Topic) -> Vec<PeerConnection> {
        self.connections
            .get(&topic)
            .map(|by_ip| by_ip.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every live (topic, ip) pair
    pub fn live_set(&self) -> BTreeSet<(Topic, IpAddr)> {
        self.connections
            .iter()
            .flat_map(|(topic, by_ip)| by_ip.keys().map(move |ip| (*topic, *ip)))
            .collect()
    }

    /// Remove every connection (shutdown)
    pub fn drain(&mut self) -> Vec<PeerConnection> {
        self.connections
            .values_mut()
            .flat_map(|by_ip| by_ip.drain().map(|(_, c)| c))
            .collect()
    }
}
