use std::collections::HashMap;

/// Identifies one run of an operation for a queue name.
///
/// Generations are unique per registry, so a stale settle for an earlier run can never retire a
/// run that started after it.
pub type Generation = u64;

#[derive(Debug)]
struct InFlightEntry<W> {
    generation: Generation,
    initiator: W,
    waiters: Vec<W>,
}

/// The callers of a run that has just settled.
#[derive(Debug)]
pub struct Settled<W> {
    pub generation: Generation,
    pub initiator: W,
    pub waiters: Vec<W>,
}

impl<W> Settled<W> {
    /// Yields every caller in the order they are released: waiters in arrival order, then the
    /// initiator.
    pub fn into_release_order(self) -> impl Iterator<Item = W> {
        self.waiters
            .into_iter()
            .chain(std::iter::once(self.initiator))
    }
}

/// Tracks the currently running operation per queue name, together with the callers waiting on
/// its outcome.
///
/// The registry only holds active runs: an entry is created by [`begin`](Self::begin) and
/// removed again by [`settle`](Self::settle), so memory is bounded by the number of queue names
/// with a run in flight.
#[derive(Debug)]
pub struct InFlightRegistry<W> {
    entries: HashMap<String, InFlightEntry<W>>,
    next_generation: Generation,
}

impl<W> Default for InFlightRegistry<W> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_generation: 0,
        }
    }
}

impl<W> InFlightRegistry<W> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a run for `name` is in flight.
    pub fn is_active(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// The number of queue names with a run in flight.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers a new run for `name`, started by `initiator`.
    ///
    /// Hands the initiator back if a run for `name` is already in flight. Callers are expected to
    /// check [`is_active`](Self::is_active) first.
    pub fn begin(&mut self, name: &str, initiator: W) -> Result<Generation, W> {
        if self.entries.contains_key(name) {
            tracing::error!(queue = name, "Tried to begin a second run for an active queue");
            return Err(initiator);
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        self.entries.insert(
            name.to_owned(),
            InFlightEntry {
                generation,
                initiator,
                waiters: Vec::new(),
            },
        );
        Ok(generation)
    }

    /// Attaches `waiter` to the run in flight for `name`.
    ///
    /// Returns the waiter's position in the queue, or hands it back if nothing is in flight.
    pub fn enqueue_waiter(&mut self, name: &str, waiter: W) -> Result<usize, W> {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.waiters.push(waiter);
                Ok(entry.waiters.len() - 1)
            }
            None => Err(waiter),
        }
    }

    /// Retires the run `generation` of `name` and returns its callers.
    ///
    /// Returns `None` if that run is no longer in flight, either because it was settled before
    /// or because a newer run has replaced it.
    pub fn settle(&mut self, name: &str, generation: Generation) -> Option<Settled<W>> {
        if self.entries.get(name)?.generation != generation {
            return None;
        }

        let entry = self.entries.remove(name)?;
        Some(Settled {
            generation: entry.generation,
            initiator: entry.initiator,
            waiters: entry.waiters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut registry = InFlightRegistry::new();
        assert!(!registry.is_active("a"));
        assert_eq!(registry.enqueue_waiter("a", 1), Err(1));

        let generation = registry.begin("a", 0).unwrap();
        assert!(registry.is_active("a"));
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.enqueue_waiter("a", 1), Ok(0));
        assert_eq!(registry.enqueue_waiter("a", 2), Ok(1));

        let settled = registry.settle("a", generation).unwrap();
        assert_eq!(settled.generation, generation);
        assert!(!registry.is_active("a"));
        assert!(registry.is_empty());

        // settling twice is a noop
        assert!(registry.settle("a", generation).is_none());
    }

    #[test]
    fn test_release_order() {
        let mut registry = InFlightRegistry::new();
        let generation = registry.begin("a", "initiator").unwrap();
        for waiter in ["first", "second", "third"] {
            registry.enqueue_waiter("a", waiter).unwrap();
        }

        let released: Vec<_> = registry
            .settle("a", generation)
            .unwrap()
            .into_release_order()
            .collect();
        assert_eq!(released, ["first", "second", "third", "initiator"]);
    }

    #[test]
    fn test_single_active_run() {
        let mut registry = InFlightRegistry::new();
        registry.begin("a", 0).unwrap();
        assert_eq!(registry.begin("a", 1), Err(1));

        // other queue names are independent
        assert!(registry.begin("b", 2).is_ok());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_stale_settle() {
        let mut registry = InFlightRegistry::new();
        let first = registry.begin("a", 0).unwrap();
        registry.settle("a", first).unwrap();

        let second = registry.begin("a", 1).unwrap();
        assert_ne!(first, second);

        // the first run must not retire the second one
        assert!(registry.settle("a", first).is_none());
        assert!(registry.is_active("a"));

        let settled = registry.settle("a", second).unwrap();
        assert_eq!(settled.initiator, 1);
    }
}
