//! Query identifier allocation.

/// First identifier handed out, and the value the counter wraps back to.
pub const FIRST_ID: u16 = 1000;

/// The counter wraps once it would pass this value.
pub const LAST_ID: u16 = u16::MAX - 10;

/// Hands out DNS header identifiers from a monotonically increasing counter.
///
/// Identifiers below [`FIRST_ID`] are never used. After [`LAST_ID`] the
/// counter restarts at [`FIRST_ID`], so an identifier is reused only after
/// `LAST_ID - FIRST_ID + 1` further allocations. Uniqueness among outstanding
/// queries therefore holds as long as fewer than that many are in flight at
/// once; the allocator does not consult the correlation table.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u16,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: FIRST_ID }
    }

    /// Starts the counter at `start`, clamped into the allocatable range.
    pub fn starting_at(start: u16) -> Self {
        Self {
            next: start.clamp(FIRST_ID, LAST_ID),
        }
    }

    pub fn next_id(&mut self) -> u16 {
        let id = self.next;
        self.next = if id >= LAST_ID { FIRST_ID } else { id + 1 };
        id
    }

    /// Number of distinct identifiers in one cycle.
    pub const fn cycle_len() -> usize {
        (LAST_ID - FIRST_ID) as usize + 1
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
