use parking_lot::Mutex;

/// The slice of online characters this channel currently hosts (spec §2:
/// "each channel owns its share of online characters"). World-cid is the
/// only identifier this core ever needs for a character; the game content
/// behind it is out of scope.
pub struct LocalCharacterTable {
    hosted: Mutex<Vec<i32>>,
}

impl LocalCharacterTable {
    pub fn new() -> Self {
        LocalCharacterTable { hosted: Mutex::new(Vec::new()) }
    }

    pub fn add(&self, world_cid: i32) {
        let mut hosted = self.hosted.lock();
        if !hosted.contains(&world_cid) {
            hosted.push(world_cid);
        }
    }

    pub fn remove(&self, world_cid: i32) {
        self.hosted.lock().retain(|cid| *cid != world_cid);
    }

    pub fn is_local(&self, world_cid: i32) -> bool {
        self.hosted.lock().contains(&world_cid)
    }

    pub fn snapshot(&self) -> Vec<i32> {
        self.hosted.lock().clone()
    }
}

impl Default for LocalCharacterTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adding_the_same_cid_twice_does_not_duplicate_it() {
        let table = LocalCharacterTable::new();
        table.add(7);
        table.add(7);
        assert_eq!(table.snapshot(), vec![7]);
    }

    #[test]
    fn removed_cids_are_no_longer_local() {
        let table = LocalCharacterTable::new();
        table.add(7);
        table.remove(7);
        assert!(!table.is_local(7));
    }
}
