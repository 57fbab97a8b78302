//! Livestream product board: reconciles pinned/stock/price push events
//! against pull refreshes, the same pattern the message log applies to chat.

use shared::{domain::LivestreamId, protocol::LiveProduct};

pub struct ProductBoard {
    livestream_id: LivestreamId,
    entries: Vec<LiveProduct>,
}

impl ProductBoard {
    pub fn new(livestream_id: LivestreamId) -> Self {
        Self {
            livestream_id,
            entries: Vec::new(),
        }
    }

    pub fn livestream_id(&self) -> &LivestreamId {
        &self.livestream_id
    }

    pub fn products(&self) -> &[LiveProduct] {
        &self.entries
    }

    pub fn pinned(&self) -> Option<&LiveProduct> {
        self.entries.iter().find(|product| product.is_pin)
    }

    /// Upsert a candidate. Keyed by the livestream-product link id when
    /// present, else by `(product_id, variant_id)`; an entry first seen
    /// through push adopts the link id once a refresh supplies it. A stream
    /// has one spotlight slot, so pinning a product unpins the rest.
    /// Returns true when the board changed.
    pub fn apply(&mut self, candidate: LiveProduct) -> bool {
        match self.find(&candidate) {
            Some(index) => {
                let mut changed = false;
                {
                    let entry = &mut self.entries[index];
                    if entry.id.is_none() && candidate.id.is_some() {
                        entry.id = candidate.id.clone();
                        changed = true;
                    }
                    if entry.is_pin != candidate.is_pin {
                        entry.is_pin = candidate.is_pin;
                        changed = true;
                    }
                    if entry.stock != candidate.stock {
                        entry.stock = candidate.stock;
                        changed = true;
                    }
                    if entry.price != candidate.price {
                        entry.price = candidate.price;
                        changed = true;
                    }
                }
                if self.entries[index].is_pin {
                    changed |= self.clear_other_pins(index);
                }
                changed
            }
            None => {
                let pinned = candidate.is_pin;
                self.entries.push(candidate);
                if pinned {
                    let keep = self.entries.len() - 1;
                    self.clear_other_pins(keep);
                }
                true
            }
        }
    }

    /// Feed a pull snapshot through the same upsert path as push events.
    pub fn refresh<I: IntoIterator<Item = LiveProduct>>(&mut self, items: I) -> bool {
        let mut changed = false;
        for item in items {
            changed |= self.apply(item);
        }
        changed
    }

    fn find(&self, candidate: &LiveProduct) -> Option<usize> {
        if let Some(id) = candidate.id.as_deref() {
            if let Some(index) = self
                .entries
                .iter()
                .position(|entry| entry.id.as_deref() == Some(id))
            {
                return Some(index);
            }
        }
        self.entries.iter().position(|entry| {
            entry.product_id == candidate.product_id && entry.variant_id == candidate.variant_id
        })
    }

    fn clear_other_pins(&mut self, keep: usize) -> bool {
        let mut changed = false;
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if index != keep && entry.is_pin {
                entry.is_pin = false;
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
#[path = "tests/live_tests.rs"]
mod tests;
