use std::collections::{BTreeSet, HashMap};
use rand::{rngs::StdRng, Rng, SeedableRng};
use crate::{
    candidate::{Candidate, PieceOrder, RankKey},
    mediator::Mediator,
    Bitfield, BlockIndex, PieceIndex,
};

// Candidate set plus its ordered index. Every mutation keeps the two in
// step: the index holds exactly one entry per candidate, keyed by the
// active comparator with the piece index as a structural tie-break.
//
// The set is built lazily on the first planning pass and maintained
// incrementally from events after that; it is never recomputed from
// scratch in the steady state. A priority change only marks the cache
// stale, and the next planning pass resyncs against the mediator.
#[derive(Debug)]
pub(crate) struct Cache {

    candidates: HashMap<PieceIndex, Candidate>,

    index: BTreeSet<(RankKey, PieceIndex)>,

    order: PieceOrder,

    // Trailing piece shorter than the rest, served first in sequential
    // mode. Piece geometry is fixed, so this is computed once.
    short_tail: Option<PieceIndex>,

    populated: bool,

    stale_priorities: bool,

    rng: StdRng,

}

impl Cache {

    pub fn new() -> Self {
        Self {
            candidates: HashMap::new(),
            index: BTreeSet::new(),
            order: PieceOrder::Rarity,
            short_tail: None,
            populated: false,
            stale_priorities: false,
            rng: StdRng::from_entropy(),
        }
    }

    // Brings the cache up to date with the mediator before a planning
    // pass: first call populates, a pending priority change resyncs.
    pub fn sync(&mut self, mediator: &dyn Mediator) {
        if !self.populated {
            self.populate(mediator);
        } else if self.stale_priorities {
            self.resync(mediator);
        }
        self.stale_priorities = false;
    }

    // Candidates in comparator order, best first.
    pub fn ranked(&self) -> impl Iterator<Item = &Candidate> + '_ {
        self.index.iter().filter_map(|(_, piece)| self.candidates.get(piece))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    fn populate(&mut self, mediator: &dyn Mediator) {
        self.candidates.clear();
        self.index.clear();
        self.short_tail = short_tail(mediator);
        self.order = if mediator.is_sequential_download() {
            PieceOrder::Sequential
        } else {
            PieceOrder::Rarity
        };

        for piece in 0..mediator.piece_count() {
            if !mediator.client_wants_piece(piece) {
                continue;
            }
            let missing_blocks = mediator.count_missing_blocks(piece);
            if missing_blocks == 0 {
                continue;
            }
            let candidate = Candidate {
                piece,
                span: mediator.block_span(piece),
                priority: mediator.priority(piece),
                missing_blocks,
                replication: mediator.count_piece_replication(piece),
                salt: self.rng.gen(),
            };
            self.insert(candidate);
        }

        self.populated = true;
        tracing::debug!(candidates = self.candidates.len(), "candidate cache populated");
    }

    // Refreshes membership and priorities after a priority change.
    // Surviving candidates keep their salt and their event-adjusted
    // replication and missing-block counts; newcomers are read from the
    // mediator in full.
    fn resync(&mut self, mediator: &dyn Mediator) {
        let mut fresh = HashMap::with_capacity(self.candidates.len());
        for piece in 0..mediator.piece_count() {
            if !mediator.client_wants_piece(piece) {
                continue;
            }
            let candidate = match self.candidates.remove(&piece) {
                Some(mut candidate) => {
                    candidate.priority = mediator.priority(piece);
                    candidate
                }
                None => {
                    let missing_blocks = mediator.count_missing_blocks(piece);
                    if missing_blocks == 0 {
                        continue;
                    }
                    Candidate {
                        piece,
                        span: mediator.block_span(piece),
                        priority: mediator.priority(piece),
                        missing_blocks,
                        replication: mediator.count_piece_replication(piece),
                        salt: self.rng.gen(),
                    }
                }
            };
            fresh.insert(piece, candidate);
        }
        self.candidates = fresh;
        self.rebuild_index();
        tracing::debug!(candidates = self.candidates.len(), "candidate cache resynced");
    }

    fn insert(&mut self, candidate: Candidate) {
        let key = (candidate.rank(self.order, self.short_tail), candidate.piece);
        self.index.insert(key);
        let replaced = self.candidates.insert(candidate.piece, candidate);
        debug_assert!(replaced.is_none(), "duplicate candidate");
    }

    fn remove(&mut self, piece: PieceIndex) {
        if let Some(candidate) = self.candidates.remove(&piece) {
            let key = (candidate.rank(self.order, self.short_tail), piece);
            let removed = self.index.remove(&key);
            debug_assert!(removed, "candidate missing from index");
        }
    }

    // Mutates one candidate and repositions it in the index.
    fn update(&mut self, piece: PieceIndex, mutate: impl FnOnce(&mut Candidate)) {
        let order = self.order;
        let short_tail = self.short_tail;
        let Some(candidate) = self.candidates.get_mut(&piece) else {
            return;
        };
        let old_key = (candidate.rank(order, short_tail), piece);
        mutate(candidate);
        let new_key = (candidate.rank(order, short_tail), piece);
        if old_key != new_key {
            let removed = self.index.remove(&old_key);
            debug_assert!(removed, "candidate missing from index");
            self.index.insert(new_key);
        }
    }

    fn rebuild_index(&mut self) {
        let order = self.order;
        let short_tail = self.short_tail;
        self.index = self
            .candidates
            .values()
            .map(|candidate| (candidate.rank(order, short_tail), candidate.piece))
            .collect();
    }

    // --- event mutations ---
    //
    // Each handler performs the smallest mutation that keeps the set and
    // the index consistent. Events before the first planning pass are
    // no-ops; population consults the mediator afresh. Unknown piece
    // indices are never candidates and fall through silently.

    pub fn peer_disconnect(&mut self, have: &Bitfield) {
        if !self.populated {
            return;
        }
        for piece in have.iter_ones() {
            self.update(piece, |candidate| {
                candidate.replication = candidate.replication.saturating_sub(1);
            });
        }
    }

    pub fn peer_bitfield(&mut self, have: &Bitfield) {
        if !self.populated {
            return;
        }
        for piece in have.iter_ones() {
            self.update(piece, |candidate| candidate.replication += 1);
        }
    }

    pub fn peer_have(&mut self, piece: PieceIndex) {
        if !self.populated {
            return;
        }
        self.update(piece, |candidate| candidate.replication += 1);
    }

    // Every candidate moves up the rarity axis together, so relative
    // order is unchanged and the rebuild is order-preserving.
    pub fn peer_have_all(&mut self) {
        if !self.populated {
            return;
        }
        for candidate in self.candidates.values_mut() {
            candidate.replication += 1;
        }
        self.rebuild_index();
    }

    pub fn block_received(&mut self, piece: PieceIndex, block: BlockIndex) {
        if !self.populated {
            return;
        }
        let Some(candidate) = self.candidates.get(&piece) else {
            return;
        };
        debug_assert!(candidate.missing_blocks > 0, "candidate with no missing blocks");
        if candidate.missing_blocks <= 1 {
            // Nothing left to request; completion follows separately.
            tracing::trace!(piece, block, "last missing block arrived");
            self.remove(piece);
        } else {
            self.update(piece, |candidate| candidate.missing_blocks -= 1);
        }
    }

    pub fn piece_completed(&mut self, piece: PieceIndex) {
        if !self.populated {
            return;
        }
        tracing::trace!(piece, "piece completed, dropping candidate");
        self.remove(piece);
    }

    pub fn priorities_changed(&mut self) {
        if self.populated {
            self.stale_priorities = true;
        }
    }

    pub fn sequential_changed(&mut self, enabled: bool) {
        if !self.populated {
            return;
        }
        self.order = if enabled { PieceOrder::Sequential } else { PieceOrder::Rarity };
        self.rebuild_index();
        tracing::debug!(enabled, "comparator switched, index rebuilt");
    }
}

// The trailing piece, when it is shorter than a full piece. Sequential
// mode serves it ahead of everything else.
fn short_tail(mediator: &dyn Mediator) -> Option<PieceIndex> {
    let count = mediator.piece_count();
    if count < 2 {
        return None;
    }
    let last = count - 1;
    let short = mediator.block_span(last).len() < mediator.block_span(0).len();
    short.then_some(last)
}
