use parking_lot::Mutex;

/// Persistent descriptor rows (spec §3's RegisteredChannel/RegisteredWorld),
/// as seen from Lobby's side of the link: there is at most one world, which
/// periodically (re-)registers its channel list.
#[derive(Debug, Clone)]
pub struct RegisteredWorld {
    pub id: i8,
    pub name: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct RegisteredChannel {
    pub id: i8,
    pub name: String,
    pub host: String,
    pub port: u16,
}

struct Inner {
    world: Option<RegisteredWorld>,
    channels: Vec<RegisteredChannel>,
    next_assignment: usize,
}

/// World registration state and the channel-assignment policy Lobby applies
/// to each login (spec §2: "assigns target Channel for each login").
pub struct WorldLink {
    inner: Mutex<Inner>,
}

impl WorldLink {
    pub fn new() -> Self {
        WorldLink {
            inner: Mutex::new(Inner {
                world: None,
                channels: Vec::new(),
                next_assignment: 0,
            }),
        }
    }

    pub fn register(&self, world: RegisteredWorld, channels: Vec<RegisteredChannel>) {
        let mut inner = self.inner.lock();
        inner.world = Some(world);
        inner.channels = channels;
    }

    pub fn world(&self) -> Option<RegisteredWorld> {
        self.inner.lock().world.clone()
    }

    /// Round-robin across the registered channel list; `None` until the
    /// world has registered at least one channel.
    pub fn assign_channel(&self) -> Option<i8> {
        let mut inner = self.inner.lock();
        if inner.channels.is_empty() {
            return None;
        }
        let idx = inner.next_assignment % inner.channels.len();
        inner.next_assignment = inner.next_assignment.wrapping_add(1);
        Some(inner.channels[idx].id)
    }
}

impl Default for WorldLink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(id: i8) -> RegisteredChannel {
        RegisteredChannel { id, name: format!("ch{id}"), host: "127.0.0.1".into(), port: 18700 + id as u16 }
    }

    #[test]
    fn assignment_round_robins_across_channels() {
        let link = WorldLink::new();
        link.register(
            RegisteredWorld { id: 0, name: "world".into(), host: "127.0.0.1".into(), port: 18666 },
            vec![channel(1), channel(2), channel(3)],
        );
        let picks: Vec<i8> = (0..6).map(|_| link.assign_channel().unwrap()).collect();
        assert_eq!(picks, vec![1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn no_channels_yields_no_assignment() {
        let link = WorldLink::new();
        assert!(link.assign_channel().is_none());
    }
}
