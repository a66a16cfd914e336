use crate::{
    candidate::Priority,
    observable::{Observer, ObserverHandle},
    span::BlockSpan,
    Bitfield, BlockIndex, FileIndex, PieceIndex,
};

// The seam between the scheduler and the torrent that embeds it. The
// torrent owns the authoritative state; the scheduler only reads through
// the queries and keeps its cache current through the subscriptions.
//
// Queries are pure and may be called many times per planning pass.
// Subscriptions return a handle whose drop unsubscribes; the scheduler
// holds the handles for its own lifetime so no callback can fire into a
// dead scheduler.
pub trait Mediator {

    fn client_has_block(&self, block: BlockIndex) -> bool;

    fn client_wants_piece(&self, piece: PieceIndex) -> bool;

    fn is_endgame(&self) -> bool;

    fn is_sequential_download(&self) -> bool;

    // In-flight requests for `block` across all peers.
    fn count_active_requests(&self, block: BlockIndex) -> usize;

    fn count_missing_blocks(&self, piece: PieceIndex) -> usize;

    // Peers, other than the client, known to hold `piece`.
    fn count_piece_replication(&self, piece: PieceIndex) -> usize;

    fn block_span(&self, piece: PieceIndex) -> BlockSpan;

    fn piece_count(&self) -> PieceIndex;

    fn priority(&self, piece: PieceIndex) -> Priority;

    // A peer went away; payload is the bitfield of pieces it held.
    fn observe_peer_disconnect(&self, observer: Observer<Bitfield>) -> ObserverHandle;

    // A peer announced its full bitfield.
    fn observe_got_bitfield(&self, observer: Observer<Bitfield>) -> ObserverHandle;

    // A block arrived and passed into client storage.
    fn observe_got_block(&self, observer: Observer<(PieceIndex, BlockIndex)>) -> ObserverHandle;

    // A peer announced a single piece.
    fn observe_got_have(&self, observer: Observer<PieceIndex>) -> ObserverHandle;

    // A peer announced it holds the whole torrent.
    fn observe_got_have_all(&self, observer: Observer<()>) -> ObserverHandle;

    // A piece finished and passed its hash check.
    fn observe_piece_completed(&self, observer: Observer<PieceIndex>) -> ObserverHandle;

    // File priorities changed; payload is the affected files and the new
    // priority.
    fn observe_priority_changed(&self, observer: Observer<(Vec<FileIndex>, Priority)>) -> ObserverHandle;

    fn observe_sequential_download_changed(&self, observer: Observer<bool>) -> ObserverHandle;
}
