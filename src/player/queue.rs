//! Playback queue for trackdeck
//!
//! [`Queue`] is the plain ordered list with the current-index bookkeeping
//! and repeat-mode resolution. [`QueueManager`] is the shared handle the
//! engines and the crossfade controller consult.
//!
//! Every mutation validates all of its indices before touching anything,
//! so a failed call leaves the queue exactly as it was.

use crate::media::Item;
use crate::player::RepeatMode;
use crate::utils::error::{PlayerError, Result};
use log::debug;
use parking_lot::RwLock;
use std::sync::Arc;

/// Resolution of a next/previous request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Move to another index
    To { from: usize, to: usize },
    /// Replay the current index (repeat mode Track)
    Repeat(usize),
    /// Already at the first item with repeat off
    Clamped(usize),
    /// Ran past the last item with repeat off
    QueueEnded,
    /// Nothing queued
    Empty,
}

impl Step {
    /// Index that becomes current, if any
    pub fn target(&self) -> Option<usize> {
        match *self {
            Step::To { to, .. } => Some(to),
            Step::Repeat(index) | Step::Clamped(index) => Some(index),
            Step::QueueEnded | Step::Empty => None,
        }
    }
}

/// What a removal did to the current index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentChange {
    Unchanged,
    /// Same item, new index
    Renumbered { from: usize, to: usize },
    /// The current item itself was removed
    Replaced { from: usize, to: Option<usize> },
}

/// Result of a successful removal
#[derive(Debug, Clone, PartialEq)]
pub struct RemoveOutcome {
    pub removed: Vec<Item>,
    pub current: CurrentChange,
}

/// Ordered list of items with a current index
#[derive(Debug, Clone, Default)]
pub struct Queue {
    items: Vec<Item>,
    current: Option<usize>,
    repeat_mode: RepeatMode,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&Item> {
        self.items.get(index)
    }

    /// Current index; `None` exactly when the queue is empty
    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current_item(&self) -> Option<&Item> {
        self.current.and_then(|index| self.items.get(index))
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat_mode
    }

    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.repeat_mode = mode;
    }

    fn check(&self, index: usize) -> Result<()> {
        if index < self.items.len() {
            Ok(())
        } else {
            Err(PlayerError::out_of_range(index as i64, self.items.len()))
        }
    }

    /// Insert `items` before `at`, or append when `at` is `None`
    ///
    /// Returns the index of the first inserted item.
    pub fn add(&mut self, items: Vec<Item>, at: Option<usize>) -> Result<usize> {
        let len = self.items.len();
        let index = at.unwrap_or(len);
        if index > len {
            return Err(PlayerError::out_of_range(index as i64, len));
        }

        let count = items.len();
        if count == 0 {
            return Ok(index);
        }
        self.items.splice(index..index, items);

        self.current = match self.current {
            None => Some(0),
            Some(current) if index <= current => Some(current + count),
            Some(current) => Some(current),
        };
        Ok(index)
    }

    /// Remove every listed index, or nothing at all if any is invalid
    pub fn remove(&mut self, indices: &[usize]) -> Result<RemoveOutcome> {
        if let Some(&bad) = indices.iter().find(|&&index| index >= self.items.len()) {
            return Err(PlayerError::out_of_range(bad as i64, self.items.len()));
        }

        let mut doomed = indices.to_vec();
        doomed.sort_unstable();
        doomed.dedup();

        let removed_before = |index: usize| doomed.iter().take_while(|&&d| d < index).count();

        let current = match self.current {
            None => CurrentChange::Unchanged,
            Some(current) if doomed.binary_search(&current).is_ok() => {
                let after = (current + 1..self.items.len()).find(|i| doomed.binary_search(i).is_err());
                let before = (0..current).rev().find(|i| doomed.binary_search(i).is_err());
                let to = after.or(before).map(|survivor| survivor - removed_before(survivor));
                CurrentChange::Replaced { from: current, to }
            }
            Some(current) => match removed_before(current) {
                0 => CurrentChange::Unchanged,
                shift => CurrentChange::Renumbered {
                    from: current,
                    to: current - shift,
                },
            },
        };

        let mut removed = Vec::with_capacity(doomed.len());
        for &index in doomed.iter().rev() {
            removed.push(self.items.remove(index));
        }
        removed.reverse();

        self.current = match current {
            CurrentChange::Unchanged => self.current,
            CurrentChange::Renumbered { to, .. } => Some(to),
            CurrentChange::Replaced { to, .. } => to,
        };

        Ok(RemoveOutcome { removed, current })
    }

    /// Move the item at `from` so that it ends up at `to`
    pub fn move_item(&mut self, from: usize, to: usize) -> Result<()> {
        self.check(from)?;
        self.check(to)?;
        if from == to {
            return Ok(());
        }

        let item = self.items.remove(from);
        self.items.insert(to, item);

        if let Some(current) = self.current {
            self.current = Some(if current == from {
                to
            } else if from < current && current <= to {
                current - 1
            } else if to <= current && current < from {
                current + 1
            } else {
                current
            });
        }
        Ok(())
    }

    /// Put `item` at `index`, returning the item it replaced
    pub fn replace(&mut self, index: usize, item: Item) -> Result<Item> {
        self.check(index)?;
        Ok(std::mem::replace(&mut self.items[index], item))
    }

    pub fn clear(&mut self) -> Vec<Item> {
        self.current = None;
        std::mem::take(&mut self.items)
    }

    /// Make `index` current, returning the previous current index
    pub fn jump_to(&mut self, index: usize) -> Result<Option<usize>> {
        self.check(index)?;
        Ok(self.current.replace(index))
    }

    /// Resolve the next index without moving
    pub fn peek_next(&self) -> Step {
        let Some(current) = self.current else { return Step::Empty };
        let len = self.items.len();
        match self.repeat_mode {
            RepeatMode::Track => Step::Repeat(current),
            RepeatMode::Queue => Step::To {
                from: current,
                to: (current + 1) % len,
            },
            RepeatMode::Off if current + 1 < len => Step::To {
                from: current,
                to: current + 1,
            },
            RepeatMode::Off => Step::QueueEnded,
        }
    }

    /// Resolve the previous index without moving
    pub fn peek_previous(&self) -> Step {
        let Some(current) = self.current else { return Step::Empty };
        let len = self.items.len();
        match self.repeat_mode {
            RepeatMode::Track => Step::Repeat(current),
            RepeatMode::Queue => Step::To {
                from: current,
                to: (current + len - 1) % len,
            },
            RepeatMode::Off if current > 0 => Step::To {
                from: current,
                to: current - 1,
            },
            RepeatMode::Off => Step::Clamped(current),
        }
    }

    pub fn next(&mut self) -> Step {
        let step = self.peek_next();
        self.commit(step);
        step
    }

    pub fn previous(&mut self) -> Step {
        let step = self.peek_previous();
        self.commit(step);
        step
    }

    fn commit(&mut self, step: Step) {
        if let Step::To { to, .. } = step {
            self.current = Some(to);
        }
    }

    /// Drop every item after the current one
    pub fn remove_upcoming(&mut self) -> usize {
        match self.current {
            Some(current) => {
                let removed = self.items.len() - current - 1;
                self.items.truncate(current + 1);
                removed
            }
            None => 0,
        }
    }

    /// Drop every item before the current one
    pub fn remove_previous(&mut self) -> usize {
        match self.current {
            Some(current) => {
                self.items.drain(..current);
                self.current = Some(0);
                current
            }
            None => 0,
        }
    }
}

/// Shared handle to the queue
#[derive(Debug, Clone, Default)]
pub struct QueueManager {
    inner: Arc<RwLock<Queue>>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Copy of the items in order
    pub fn items(&self) -> Vec<Item> {
        self.inner.read().items().to_vec()
    }

    pub fn get(&self, index: usize) -> Result<Item> {
        let queue = self.inner.read();
        queue
            .get(index)
            .cloned()
            .ok_or_else(|| PlayerError::out_of_range(index as i64, queue.len()))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.inner.read().current_index()
    }

    pub fn current_item(&self) -> Option<Item> {
        self.inner.read().current_item().cloned()
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.inner.read().repeat_mode()
    }

    pub fn set_repeat_mode(&self, mode: RepeatMode) {
        debug!("Repeat mode set to {:?}", mode);
        self.inner.write().set_repeat_mode(mode);
    }

    pub fn add(&self, items: Vec<Item>, at: Option<usize>) -> Result<usize> {
        let count = items.len();
        let index = self.inner.write().add(items, at)?;
        debug!("Queued {} item(s) at {}", count, index);
        Ok(index)
    }

    pub fn remove(&self, indices: &[usize]) -> Result<RemoveOutcome> {
        let outcome = self.inner.write().remove(indices)?;
        debug!("Removed {} item(s), current {:?}", outcome.removed.len(), outcome.current);
        Ok(outcome)
    }

    pub fn move_item(&self, from: usize, to: usize) -> Result<()> {
        self.inner.write().move_item(from, to)?;
        debug!("Moved item {} to {}", from, to);
        Ok(())
    }

    pub fn replace(&self, index: usize, item: Item) -> Result<Item> {
        self.inner.write().replace(index, item)
    }

    pub fn clear(&self) -> usize {
        let removed = self.inner.write().clear().len();
        debug!("Cleared {} item(s)", removed);
        removed
    }

    pub fn jump_to(&self, index: usize) -> Result<Option<usize>> {
        self.inner.write().jump_to(index)
    }

    pub fn peek_next(&self) -> Step {
        self.inner.read().peek_next()
    }

    pub fn peek_previous(&self) -> Step {
        self.inner.read().peek_previous()
    }

    pub fn next(&self) -> Step {
        self.inner.write().next()
    }

    pub fn previous(&self) -> Step {
        self.inner.write().previous()
    }

    pub fn remove_upcoming(&self) -> usize {
        self.inner.write().remove_upcoming()
    }

    pub fn remove_previous(&self) -> usize {
        self.inner.write().remove_previous()
    }

    /// Read the whole queue under one lock
    pub fn with_queue<R>(&self, f: impl FnOnce(&Queue) -> R) -> R {
        f(&self.inner.read())
    }
}
