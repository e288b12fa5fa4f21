use parking_lot::Mutex;

/// A channel that has registered itself with this world over
/// `PACKET_SET_CHANNEL_INFO`.
#[derive(Debug, Clone)]
pub struct RegisteredChannel {
    pub id: i8,
    pub name: String,
    pub host: String,
    pub port: u16,
}

/// The world's own descriptor, as handed to Lobby and echoed back to any
/// channel that asks via `PACKET_GET_WORLD_INFO`.
#[derive(Debug, Clone)]
pub struct WorldDescription {
    pub id: i8,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub channels: Vec<RegisteredChannel>,
}

struct Inner {
    id: i8,
    name: String,
    host: String,
    port: u16,
    channels: Vec<RegisteredChannel>,
}

/// Process-topology bookkeeping: this world's own descriptor plus every
/// channel currently registered to it (spec §5.11's `WorldRegistry`).
pub struct WorldRegistry {
    inner: Mutex<Inner>,
}

impl WorldRegistry {
    pub fn new(id: i8, name: String, host: String, port: u16) -> Self {
        WorldRegistry {
            inner: Mutex::new(Inner { id, name, host, port, channels: Vec::new() }),
        }
    }

    pub fn register_channel(&self, channel: RegisteredChannel) {
        let mut inner = self.inner.lock();
        inner.channels.retain(|c| c.id != channel.id);
        inner.channels.push(channel);
    }

    pub fn remove_channel(&self, id: i8) {
        self.inner.lock().channels.retain(|c| c.id != id);
    }

    pub fn describe(&self) -> WorldDescription {
        let inner = self.inner.lock();
        WorldDescription {
            id: inner.id,
            name: inner.name.clone(),
            host: inner.host.clone(),
            port: inner.port,
            channels: inner.channels.clone(),
        }
    }

    pub fn channel_ids(&self) -> Vec<i8> {
        self.inner.lock().channels.iter().map(|c| c.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_registering_a_channel_id_replaces_it() {
        let registry = WorldRegistry::new(0, "World".into(), "127.0.0.1".into(), 18666);
        registry.register_channel(RegisteredChannel { id: 1, name: "ch1".into(), host: "127.0.0.1".into(), port: 14666 });
        registry.register_channel(RegisteredChannel { id: 1, name: "ch1-rebooted".into(), host: "127.0.0.1".into(), port: 14667 });
        let description = registry.describe();
        assert_eq!(description.channels.len(), 1);
        assert_eq!(description.channels[0].name, "ch1-rebooted");
    }

    #[test]
    fn remove_channel_drops_it_from_the_description() {
        let registry = WorldRegistry::new(0, "World".into(), "127.0.0.1".into(), 18666);
        registry.register_channel(RegisteredChannel { id: 1, name: "ch1".into(), host: "127.0.0.1".into(), port: 14666 });
        registry.remove_channel(1);
        assert!(registry.describe().channels.is_empty());
    }
}
