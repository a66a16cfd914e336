use std::cmp::Reverse;
use crate::{span::BlockSpan, PieceIndex};

// Piece download priority, derived from file priorities by the embedding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

// Which comparator the ordered index is currently built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PieceOrder {
    Rarity,
    Sequential,
}

// A piece eligible for requests: the client wants it and blocks are still
// missing. The salt is frozen at insertion so equal pieces keep a stable
// relative order until one of them is removed and re-added.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {

    pub piece: PieceIndex,

    pub span: BlockSpan,

    pub priority: Priority,

    pub missing_blocks: usize,

    pub replication: usize,

    pub salt: u32,

}

// Comparator projection of a candidate. Lower keys are served first. The
// two variants never coexist in one index; a comparator switch rebuilds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum RankKey {

    // A short trailing piece ranks ahead of everything, the rest ascend
    // by piece index.
    Sequential {
        group: u8,
        piece: PieceIndex,
    },

    // Highest priority, then nearest to completion, then rarest. The salt
    // shuffles pieces that are equal on all three axes.
    Rarity {
        priority: Reverse<Priority>,
        missing_blocks: usize,
        replication: usize,
        salt: u32,
    },
}

impl Candidate {

    pub fn rank(&self, order: PieceOrder, short_tail: Option<PieceIndex>) -> RankKey {
        match order {
            PieceOrder::Sequential => RankKey::Sequential {
                group: if short_tail == Some(self.piece) { 0 } else { 1 },
                piece: self.piece,
            },
            PieceOrder::Rarity => RankKey::Rarity {
                priority: Reverse(self.priority),
                missing_blocks: self.missing_blocks,
                replication: self.replication,
                salt: self.salt,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(piece: PieceIndex) -> Candidate {
        Candidate {
            piece,
            span: BlockSpan::new(piece * 100, piece * 100 + 100),
            priority: Priority::Normal,
            missing_blocks: 100,
            replication: 2,
            salt: 0,
        }
    }

    #[test]
    fn test_priority_orders_before_completion() {
        let mut high = candidate(0);
        high.priority = Priority::High;
        high.missing_blocks = 100;
        let mut near_done = candidate(1);
        near_done.missing_blocks = 1;

        let rank = |c: &Candidate| c.rank(PieceOrder::Rarity, None);
        assert!(rank(&high) < rank(&near_done));
    }

    #[test]
    fn test_completion_orders_before_rarity() {
        let mut near_done = candidate(0);
        near_done.missing_blocks = 10;
        near_done.replication = 50;
        let mut rare = candidate(1);
        rare.missing_blocks = 90;
        rare.replication = 1;

        let rank = |c: &Candidate| c.rank(PieceOrder::Rarity, None);
        assert!(rank(&near_done) < rank(&rare));
    }

    #[test]
    fn test_rarity_orders_before_salt() {
        let mut rare = candidate(0);
        rare.replication = 1;
        rare.salt = u32::MAX;
        let mut common = candidate(1);
        common.replication = 2;
        common.salt = 0;

        let rank = |c: &Candidate| c.rank(PieceOrder::Rarity, None);
        assert!(rank(&rare) < rank(&common));
    }

    #[test]
    fn test_salt_breaks_full_ties() {
        let mut a = candidate(0);
        a.salt = 7;
        let mut b = candidate(1);
        b.salt = 9;

        let rank = |c: &Candidate| c.rank(PieceOrder::Rarity, None);
        assert!(rank(&a) < rank(&b));
    }

    #[test]
    fn test_sequential_ascends_by_piece() {
        let ranks: Vec<_> = (0..4)
            .map(|piece| candidate(piece).rank(PieceOrder::Sequential, None))
            .collect();
        assert!(ranks.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_sequential_short_tail_first() {
        let first = candidate(0).rank(PieceOrder::Sequential, Some(2));
        let tail = candidate(2).rank(PieceOrder::Sequential, Some(2));
        assert!(tail < first);
    }
}
