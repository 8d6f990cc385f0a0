use crate::id::{Identifier, ID_BITS};

/// Number of entries in a finger table, one per bit of the identifier space.
pub const FINGER_COUNT: usize = ID_BITS as usize;

/// One finger: the arc [start, end) of the ring it covers and the best
/// known owner of that arc. The owner is an approximation refreshed
/// lazily by the maintenance loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerEntry {
	pub start: Identifier,
	pub end: Identifier,
	pub node: Identifier,
}

/// The per-node table of 160 shortcut pointers. Entry i covers
/// [local + 2^i, local + 2^(i+1)); entries are created once and updated
/// one at a time as lookups for their interval ends complete.
#[derive(Debug, Clone)]
pub struct FingerTable {
	local: Identifier,
	entries: Vec<FingerEntry>,
	refresh_cursor: usize,
}

impl FingerTable {
	pub fn new(local: Identifier) -> Self {
		let mut entries = Vec::with_capacity(FINGER_COUNT);
		let mut start = local.wrapping_add(&Identifier::power_of_two(0));
		for i in 0..FINGER_COUNT {
			let end = local.wrapping_add(&Identifier::power_of_two(i as u32 + 1));
			entries.push(FingerEntry { start, end, node: local });
			start = end;
		}
		FingerTable {
			local,
			entries,
			// first advance lands on entry 0
			refresh_cursor: FINGER_COUNT - 1,
		}
	}

	pub fn entry(&self, index: usize) -> &FingerEntry {
		&self.entries[index]
	}

	/// Advance the rotating cursor and return the entry index plus the
	/// identifier whose successor should be looked up to refresh it.
	/// Called exactly once per maintenance tick.
	pub fn next_refresh_target(&mut self) -> (usize, Identifier) {
		self.refresh_cursor = (self.refresh_cursor + 1) % FINGER_COUNT;
		(self.refresh_cursor, self.entries[self.refresh_cursor].end)
	}

	/// Store a completed lookup result for entry `index`.
	pub fn update(&mut self, index: usize, node: Identifier) {
		self.entries[index].node = node;
	}

	/// The furthest known node that precedes `target` on the ring: scan
	/// from the widest finger down, returning the first owner strictly
	/// inside the open arc (local, target). Falls back to the local id
	/// when no finger qualifies.
	pub fn closest_preceding(&self, target: &Identifier) -> Identifier {
		for entry in self.entries.iter().rev() {
			if entry.node.in_open(&self.local, target) {
				return entry.node;
			}
		}
		self.local
	}
}
