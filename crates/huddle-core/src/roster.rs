use crate::protocol::{PeerConfig, PeerInfo, ProducerInfo};

/// Outcome of applying a peer snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Replaced,
}

/// Ordered list of everyone in the room, unique by user id.
///
/// The local participant, once set, is always entry 0. Remote entries keep
/// insertion order, except that pinned peers sort ahead of unpinned ones
/// (stable, so relative order inside each group is preserved).
#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: Vec<PeerInfo>,
    local_user_id: Option<String>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_user_id(&self) -> Option<&str> {
        self.local_user_id.as_deref()
    }

    /// Install or refresh the local participant at entry 0.
    pub fn set_local(&mut self, peer: PeerInfo) {
        if let Some(current) = self.local_user_id.take() {
            self.entries.retain(|p| p.user_id != current);
        }
        self.entries.retain(|p| p.user_id != peer.user_id);
        self.local_user_id = Some(peer.user_id.clone());
        self.entries.insert(0, peer);
    }

    pub fn local(&self) -> Option<&PeerInfo> {
        self.local_user_id.as_ref()?;
        self.entries.first()
    }

    pub fn set_local_producers(&mut self, producers: Vec<ProducerInfo>) -> bool {
        if self.local_user_id.is_none() {
            return false;
        }
        match self.entries.first_mut() {
            Some(local) => {
                local.producers = producers;
                true
            }
            None => false,
        }
    }

    fn is_local(&self, user_id: &str) -> bool {
        self.local_user_id.as_deref() == Some(user_id)
    }

    /// Apply a full snapshot of a remote peer: replace the entry wholesale
    /// if present, append it otherwise.
    pub fn upsert(&mut self, peer: PeerInfo) -> Upsert {
        let outcome = match self.entries.iter_mut().find(|p| p.user_id == peer.user_id) {
            Some(existing) => {
                *existing = peer;
                Upsert::Replaced
            }
            None => {
                self.entries.push(peer);
                Upsert::Inserted
            }
        };
        self.sort_pinned();
        outcome
    }

    pub fn remove(&mut self, user_id: &str) -> Option<PeerInfo> {
        if self.is_local(user_id) {
            return None;
        }
        let index = self.entries.iter().position(|p| p.user_id == user_id)?;
        Some(self.entries.remove(index))
    }

    /// Drop a producer from whichever entry owns it. Returns the owner.
    pub fn remove_producer(&mut self, producer_id: &str) -> Option<String> {
        for peer in self.entries.iter_mut() {
            if let Some(index) = peer.producers.iter().position(|p| p.producer_id == producer_id) {
                peer.producers.remove(index);
                return Some(peer.user_id.clone());
            }
        }
        None
    }

    /// Replace a peer's config wholesale. Unknown peers are ignored.
    pub fn replace_config(&mut self, config: PeerConfig) -> bool {
        let Some(peer) = self.entries.iter_mut().find(|p| p.user_id == config.user_id) else {
            return false;
        };
        peer.peer_config = config;
        self.sort_pinned();
        true
    }

    pub fn set_pinned(&mut self, user_id: &str, pinned: bool) -> bool {
        let Some(peer) = self.entries.iter_mut().find(|p| p.user_id == user_id) else {
            return false;
        };
        peer.peer_config.is_pinned = pinned;
        self.sort_pinned();
        true
    }

    /// Stable sort of the remote entries: pinned first.
    pub fn sort_pinned(&mut self) {
        let start = usize::from(self.local_user_id.is_some() && !self.entries.is_empty());
        self.entries[start..].sort_by_key(|p| !p.is_pinned());
    }

    pub fn get(&self, user_id: &str) -> Option<&PeerInfo> {
        self.entries.iter().find(|p| p.user_id == user_id)
    }

    pub fn entries(&self) -> &[PeerInfo] {
        &self.entries
    }

    /// Owned copy for observers.
    pub fn snapshot(&self) -> Vec<PeerInfo> {
        self.entries.clone()
    }

    /// Snapshot without the local participant.
    pub fn remote_snapshot(&self) -> Vec<PeerInfo> {
        self.entries
            .iter()
            .filter(|p| !self.is_local(&p.user_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.local_user_id = None;
    }
}
