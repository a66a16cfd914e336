mod cache;
mod candidate;
mod mediator;
mod observable;
mod span;
mod wishlist;


// Piece and block indices are torrent-global; block indices do not reset
// at piece boundaries.
pub type PieceIndex = usize;
pub type BlockIndex = usize;
pub type FileIndex = usize;

pub type Bitfield = bitvec::vec::BitVec<u8, bitvec::order::Msb0>;

// Re-exports
pub use candidate::Priority;
pub use mediator::Mediator;
pub use observable::{Observable, Observer, ObserverHandle};
pub use span::BlockSpan;
pub use wishlist::Wishlist;
