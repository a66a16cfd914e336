use std::{cell::RefCell, rc::Rc};
use crate::{
    cache::Cache,
    mediator::Mediator,
    observable::ObserverHandle,
    span::{BlockSpan, SpanAccumulator},
    BlockIndex, PieceIndex,
};

// Per-torrent block-request scheduler. Ranks the torrent's wanted,
// incomplete pieces and slices block spans off the best of them for
// whichever peer is asking.
//
// Single-threaded by contract: planning passes and event delivery run to
// completion inside the torrent's serialisation domain, so the cache is
// only ever touched by one party at a time.
pub struct Wishlist {

    // Declared before the mediator so subscriptions are released first.
    _observers: Vec<ObserverHandle>,

    cache: Rc<RefCell<Cache>>,

    mediator: Box<dyn Mediator>,

}

impl Wishlist {

    pub fn new(mediator: Box<dyn Mediator>) -> Self {
        let cache = Rc::new(RefCell::new(Cache::new()));
        let observers = subscribe(mediator.as_ref(), &cache);
        Self {
            _observers: observers,
            cache,
            mediator,
        }
    }

    // Plans the next batch of requests for one peer: up to `n_wanted`
    // blocks, as an ordered list of disjoint, non-empty spans.
    //
    // `peer_has` is the asking peer's piece capability; `peer_requested`
    // reports blocks already outstanding to that same peer. A block is
    // emitted only if the client lacks it, this peer has not been asked
    // for it, and no other peer is fetching it (outside endgame; during
    // endgame up to two peers may fetch the same block).
    pub fn next(
        &mut self,
        n_wanted: usize,
        peer_has: impl Fn(PieceIndex) -> bool,
        peer_requested: impl Fn(BlockIndex) -> bool,
    ) -> Vec<BlockSpan> {
        let mut cache = self.cache.borrow_mut();
        cache.sync(self.mediator.as_ref());
        if n_wanted == 0 {
            return Vec::new();
        }

        let endgame = self.mediator.is_endgame();
        let max_active = if endgame { 1 } else { 0 };
        let mut accumulator = SpanAccumulator::default();
        let mut accepted = 0;

        'candidates: for candidate in cache.ranked() {
            if !peer_has(candidate.piece) {
                continue;
            }
            for block in candidate.span.blocks() {
                if self.mediator.client_has_block(block) {
                    continue;
                }
                if peer_requested(block) {
                    continue;
                }
                if self.mediator.count_active_requests(block) > max_active {
                    continue;
                }
                accumulator.push(block);
                accepted += 1;
                if accepted == n_wanted {
                    break 'candidates;
                }
            }
            // Piece boundary: never let a span straddle two pieces.
            accumulator.flush();
        }

        let spans = accumulator.into_spans();
        tracing::trace!(
            n_wanted,
            blocks = accepted,
            spans = spans.len(),
            endgame,
            candidates = cache.len(),
            "planned request batch",
        );
        spans
    }
}

fn subscribe(mediator: &dyn Mediator, cache: &Rc<RefCell<Cache>>) -> Vec<ObserverHandle> {
    let on_disconnect = {
        let cache = Rc::clone(cache);
        mediator.observe_peer_disconnect(Box::new(move |have| {
            cache.borrow_mut().peer_disconnect(have);
        }))
    };
    let on_bitfield = {
        let cache = Rc::clone(cache);
        mediator.observe_got_bitfield(Box::new(move |have| {
            cache.borrow_mut().peer_bitfield(have);
        }))
    };
    let on_block = {
        let cache = Rc::clone(cache);
        mediator.observe_got_block(Box::new(move |&(piece, block)| {
            cache.borrow_mut().block_received(piece, block);
        }))
    };
    let on_have = {
        let cache = Rc::clone(cache);
        mediator.observe_got_have(Box::new(move |&piece| {
            cache.borrow_mut().peer_have(piece);
        }))
    };
    let on_have_all = {
        let cache = Rc::clone(cache);
        mediator.observe_got_have_all(Box::new(move |&()| {
            cache.borrow_mut().peer_have_all();
        }))
    };
    let on_completed = {
        let cache = Rc::clone(cache);
        mediator.observe_piece_completed(Box::new(move |&piece| {
            cache.borrow_mut().piece_completed(piece);
        }))
    };
    let on_priority = {
        let cache = Rc::clone(cache);
        mediator.observe_priority_changed(Box::new(move |_| {
            cache.borrow_mut().priorities_changed();
        }))
    };
    let on_sequential = {
        let cache = Rc::clone(cache);
        mediator.observe_sequential_download_changed(Box::new(move |&enabled| {
            cache.borrow_mut().sequential_changed(enabled);
        }))
    };
    vec![
        on_disconnect,
        on_bitfield,
        on_block,
        on_have,
        on_have_all,
        on_completed,
        on_priority,
        on_sequential,
    ]
}
