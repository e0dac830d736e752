//! Cursor movement over the participant × item grid.
//!
//! Positions are ordered row-major: every item of participant 0, then every
//! item of participant 1, and so on. None of these functions touch scores
//! directly; callers flush their pending score before moving.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub participant: usize,
    pub item: usize,
}

impl Cursor {
    pub fn new(participant: usize, item: usize) -> Self {
        Self { participant, item }
    }
}

/// Dimensions of an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub participants: usize,
    pub items: usize,
}

impl Grid {
    pub fn new(participants: usize, items: usize) -> Self {
        Self {
            participants,
            items,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.participants == 0 || self.items == 0
    }

    pub fn cell_count(&self) -> usize {
        self.participants * self.items
    }

    pub fn contains(&self, cursor: Cursor) -> bool {
        cursor.participant < self.participants && cursor.item < self.items
    }

    pub fn clamp(&self, cursor: Cursor) -> Cursor {
        Cursor {
            participant: cursor.participant.min(self.participants.saturating_sub(1)),
            item: cursor.item.min(self.items.saturating_sub(1)),
        }
    }

    fn ordinal(&self, cursor: Cursor) -> usize {
        cursor.participant * self.items + cursor.item
    }

    fn cursor_at(&self, ordinal: usize) -> Cursor {
        Cursor {
            participant: ordinal / self.items,
            item: ordinal % self.items,
        }
    }

    fn is_last_item(&self, cursor: Cursor) -> bool {
        cursor.item + 1 >= self.items
    }
}

/// Next item, rolling over to item 0 of the next participant.
pub fn advance_item(grid: Grid, cursor: Cursor) -> Cursor {
    if grid.is_empty() {
        return cursor;
    }
    if cursor.item + 1 < grid.items {
        Cursor::new(cursor.participant, cursor.item + 1)
    } else if cursor.participant + 1 < grid.participants {
        Cursor::new(cursor.participant + 1, 0)
    } else {
        cursor
    }
}

/// Previous item, rolling back to the last item of the previous participant.
pub fn retreat_item(grid: Grid, cursor: Cursor) -> Cursor {
    if grid.is_empty() {
        return cursor;
    }
    if cursor.item > 0 {
        Cursor::new(cursor.participant, cursor.item - 1)
    } else if cursor.participant > 0 {
        Cursor::new(cursor.participant - 1, grid.items - 1)
    } else {
        cursor
    }
}

pub fn advance_participant(grid: Grid, cursor: Cursor) -> Cursor {
    if grid.is_empty() {
        return cursor;
    }
    if cursor.participant + 1 < grid.participants {
        Cursor::new(cursor.participant + 1, 0)
    } else {
        cursor
    }
}

pub fn retreat_participant(grid: Grid, cursor: Cursor) -> Cursor {
    if grid.is_empty() {
        return cursor;
    }
    if cursor.participant > 0 {
        Cursor::new(cursor.participant - 1, 0)
    } else {
        cursor
    }
}

/// True when moving forward from `cursor` leaves its participant.
pub fn departs_participant(grid: Grid, cursor: Cursor) -> bool {
    !grid.is_empty() && grid.is_last_item(cursor)
}

/// First unscored position strictly after `cursor`, wrapping around once.
///
/// The scan visits every other cell before finally checking `cursor` itself,
/// so it takes at most `participants * items` probes.
pub fn find_nearest_unscored<F>(grid: Grid, cursor: Cursor, mut is_scored: F) -> Option<Cursor>
where
    F: FnMut(Cursor) -> bool,
{
    if grid.is_empty() {
        return None;
    }

    let total = grid.cell_count();
    let start = grid.ordinal(grid.clamp(cursor));

    (1..=total)
        .map(|offset| grid.cursor_at((start + offset) % total))
        .find(|&candidate| !is_scored(candidate))
}
