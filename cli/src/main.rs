use std::{
    cell::RefCell,
    collections::HashSet,
    rc::Rc,
};
use clap::Parser;
use color_eyre::eyre::ensure;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing_subscriber::EnvFilter;
use wishlist::{
    Bitfield, BlockIndex, BlockSpan, Mediator, Observable, Observer, ObserverHandle,
    PieceIndex, Priority, Wishlist,
};

#[derive(Parser)]
#[command(name = "wishlist-sim", about = "Drive the block scheduler over a synthetic swarm")]
struct Args {

    #[arg(long, default_value_t = 64, help = "Number of pieces")]
    pieces: usize,

    #[arg(long, default_value_t = 16, help = "Blocks per piece; the last piece gets half")]
    blocks_per_piece: usize,

    #[arg(long, default_value_t = 8, help = "Number of synthetic peers")]
    peers: usize,

    #[arg(long, default_value_t = 12, help = "Request budget per peer per tick")]
    queue: usize,

    #[arg(long, default_value_t = 0.1, help = "Probability a requested block is lost in flight")]
    loss: f64,

    #[arg(long, help = "Download pieces in order")]
    sequential: bool,

    #[arg(short, long, help = "Verbose output")]
    verbose: bool,
}

// Authoritative torrent + swarm state the simulated mediator reads.
struct SwarmState {

    spans: Vec<BlockSpan>,

    // Client block ownership, torrent-global index.
    have: Vec<bool>,

    // Missing blocks per piece.
    missing: Vec<usize>,

    // In-flight request count per block, across all peers.
    active: Vec<usize>,

    // One bitfield per peer.
    peer_have: Vec<Bitfield>,

    blocks_per_piece: usize,

    endgame: bool,

    sequential: bool,

}

impl SwarmState {

    fn new(args: &Args) -> Self {
        let mut spans = Vec::with_capacity(args.pieces);
        let mut begin = 0;
        for piece in 0..args.pieces {
            let len = if piece == args.pieces - 1 {
                (args.blocks_per_piece / 2).max(1)
            } else {
                args.blocks_per_piece
            };
            spans.push(BlockSpan::new(begin, begin + len));
            begin += len;
        }
        let num_blocks = begin;

        Self {
            missing: spans.iter().map(BlockSpan::len).collect(),
            spans,
            have: vec![false; num_blocks],
            active: vec![0; num_blocks],
            peer_have: Vec::new(),
            blocks_per_piece: args.blocks_per_piece,
            endgame: false,
            sequential: args.sequential,
        }
    }

    #[inline]
    fn piece_of(&self, block: BlockIndex) -> PieceIndex {
        block / self.blocks_per_piece
    }

    fn missing_total(&self) -> usize {
        self.missing.iter().sum()
    }
}

#[derive(Clone, Default)]
struct Events {
    got_block: Observable<(PieceIndex, BlockIndex)>,
    got_have: Observable<PieceIndex>,
    piece_completed: Observable<PieceIndex>,
}

// Mediator over the simulated torrent. Swarm churn events the sim never
// produces get a handle on a dormant observable.
#[derive(Clone)]
struct SimMediator {
    state: Rc<RefCell<SwarmState>>,
    events: Events,
    dormant_bitfield: Observable<Bitfield>,
    dormant_priority: Observable<(Vec<usize>, Priority)>,
    dormant_sequential: Observable<bool>,
    dormant_have_all: Observable<()>,
}

impl SimMediator {
    fn new(state: Rc<RefCell<SwarmState>>, events: Events) -> Self {
        Self {
            state,
            events,
            dormant_bitfield: Observable::new(),
            dormant_priority: Observable::new(),
            dormant_sequential: Observable::new(),
            dormant_have_all: Observable::new(),
        }
    }
}

impl Mediator for SimMediator {

    fn client_has_block(&self, block: BlockIndex) -> bool {
        self.state.borrow().have[block]
    }

    fn client_wants_piece(&self, _piece: PieceIndex) -> bool {
        true
    }

    fn is_endgame(&self) -> bool {
        self.state.borrow().endgame
    }

    fn is_sequential_download(&self) -> bool {
        self.state.borrow().sequential
    }

    fn count_active_requests(&self, block: BlockIndex) -> usize {
        self.state.borrow().active[block]
    }

    fn count_missing_blocks(&self, piece: PieceIndex) -> usize {
        self.state.borrow().missing[piece]
    }

    fn count_piece_replication(&self, piece: PieceIndex) -> usize {
        self.state.borrow().peer_have.iter().filter(|have| have[piece]).count()
    }

    fn block_span(&self, piece: PieceIndex) -> BlockSpan {
        self.state.borrow().spans[piece]
    }

    fn piece_count(&self) -> PieceIndex {
        self.state.borrow().spans.len()
    }

    fn priority(&self, _piece: PieceIndex) -> Priority {
        Priority::Normal
    }

    fn observe_peer_disconnect(&self, observer: Observer<Bitfield>) -> ObserverHandle {
        self.dormant_bitfield.observe(observer)
    }

    fn observe_got_bitfield(&self, observer: Observer<Bitfield>) -> ObserverHandle {
        self.dormant_bitfield.observe(observer)
    }

    fn observe_got_block(&self, observer: Observer<(PieceIndex, BlockIndex)>) -> ObserverHandle {
        self.events.got_block.observe(observer)
    }

    fn observe_got_have(&self, observer: Observer<PieceIndex>) -> ObserverHandle {
        self.events.got_have.observe(observer)
    }

    fn observe_got_have_all(&self, observer: Observer<()>) -> ObserverHandle {
        self.dormant_have_all.observe(observer)
    }

    fn observe_piece_completed(&self, observer: Observer<PieceIndex>) -> ObserverHandle {
        self.events.piece_completed.observe(observer)
    }

    fn observe_priority_changed(&self, observer: Observer<(Vec<usize>, Priority)>) -> ObserverHandle {
        self.dormant_priority.observe(observer)
    }

    fn observe_sequential_download_changed(&self, observer: Observer<bool>) -> ObserverHandle {
        self.dormant_sequential.observe(observer)
    }
}

struct SimStats {
    blocks: usize,
    ticks: usize,
    requests: usize,
    lost: usize,
    duplicates: usize,
}

fn run(args: &Args) -> SimStats {
    let state = Rc::new(RefCell::new(SwarmState::new(args)));
    let events = Events::default();
    let mut rng = StdRng::from_entropy();

    {
        // Peer 0 seeds; the rest hold a random three quarters of the
        // torrent, so rarity actually varies.
        let mut state = state.borrow_mut();
        let pieces = state.spans.len();
        state.peer_have.push(Bitfield::repeat(true, pieces));
        for _ in 1..args.peers {
            let mut have = Bitfield::repeat(false, pieces);
            for piece in 0..pieces {
                if rng.gen_bool(0.75) {
                    have.set(piece, true);
                }
            }
            state.peer_have.push(have);
        }
    }

    let mediator = SimMediator::new(Rc::clone(&state), events.clone());
    let mut wishlist = Wishlist::new(Box::new(mediator));
    let mut outstanding: Vec<HashSet<BlockIndex>> = vec![HashSet::new(); args.peers];
    let mut stats = SimStats {
        blocks: state.borrow().have.len(),
        ticks: 0,
        requests: 0,
        lost: 0,
        duplicates: 0,
    };

    while state.borrow().missing_total() > 0 {
        stats.ticks += 1;

        // Request phase: top up every peer's queue from the wishlist.
        for peer in 0..args.peers {
            let budget = args.queue.saturating_sub(outstanding[peer].len());
            if budget == 0 {
                continue;
            }
            let peer_bits = state.borrow().peer_have[peer].clone();
            let inflight = &outstanding[peer];
            let spans = wishlist.next(
                budget,
                |piece| peer_bits[piece],
                |block| inflight.contains(&block),
            );

            let mut state = state.borrow_mut();
            for span in &spans {
                for block in span.blocks() {
                    outstanding[peer].insert(block);
                    state.active[block] += 1;
                    stats.requests += 1;
                }
            }
            tracing::debug!(peer, tick = stats.ticks, spans = spans.len(), "queued requests");
        }

        // Delivery phase: every in-flight block either arrives or is lost.
        let mut arrived: Vec<(PieceIndex, BlockIndex)> = Vec::new();
        let mut completed: Vec<PieceIndex> = Vec::new();
        {
            let mut state = state.borrow_mut();
            for inflight in &mut outstanding {
                for block in inflight.drain() {
                    state.active[block] -= 1;
                    if rng.gen_bool(args.loss) {
                        stats.lost += 1;
                        continue;
                    }
                    if state.have[block] {
                        // Endgame double-request resolved by another peer.
                        stats.duplicates += 1;
                        continue;
                    }
                    let piece = state.piece_of(block);
                    state.have[block] = true;
                    state.missing[piece] -= 1;
                    arrived.push((piece, block));
                    if state.missing[piece] == 0 {
                        completed.push(piece);
                    }
                }
            }

            let remaining = state.missing_total();
            if !state.endgame && remaining > 0 && remaining <= args.peers * args.queue {
                tracing::info!(remaining, "entering endgame");
                state.endgame = true;
            }
        }

        for event in &arrived {
            events.got_block.emit(event);
        }
        for &piece in &completed {
            tracing::info!(piece, "piece completed");
            events.piece_completed.emit(&piece);
        }

        // Swarm churn: now and then a peer picks up a piece and announces it.
        if args.peers > 1 && rng.gen_bool(0.2) {
            let peer = rng.gen_range(1..args.peers);
            let piece = rng.gen_range(0..state.borrow().spans.len());
            let announced = {
                let mut state = state.borrow_mut();
                if state.peer_have[peer][piece] {
                    false
                } else {
                    state.peer_have[peer].set(piece, true);
                    true
                }
            };
            if announced {
                events.got_have.emit(&piece);
            }
        }
    }

    stats
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    ensure!(args.pieces > 0, "need at least one piece");
    ensure!(args.blocks_per_piece > 1, "need at least two blocks per piece");
    ensure!(args.peers > 0, "need at least one peer");
    ensure!(args.queue > 0, "need a nonzero request budget");
    ensure!((0.0..1.0).contains(&args.loss), "loss must be in [0, 1)");

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let stats = run(&args);
    tracing::info!(
        blocks = stats.blocks,
        ticks = stats.ticks,
        requests = stats.requests,
        lost = stats.lost,
        duplicates = stats.duplicates,
        "torrent complete",
    );
    Ok(())
}
