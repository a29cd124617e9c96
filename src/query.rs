//! The query surface: JSON request/response types, request validation,
//! position/children expansion, and the per-category lookup logic that
//! turns a batch of root positions into classified counts and game
//! metadata.
//!
//! *Continuations* queries use a [`crate::key::OrderKind::FullOrder`]
//! equal-range keyed on the exact reverse move. *Transpositions* and
//! *All* both start from the same [`crate::key::OrderKind::HashOnlyOrder`]
//! equal-range — every entry sharing the position's hash regardless of
//! reverse move — and differ only in whether entries whose decoded
//! reverse move matches the query's are kept (continuations, excluded
//! from transpositions) or not (transpositions) or unconditionally kept
//! (all). This single scan-and-split is equivalent to issuing the two
//! separate queries the informal description suggests and subtracting
//! counts, without reading the hash range twice.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::chess::movegen::{apply_move, pseudo_legal_moves};
use crate::chess::pgn::{move_to_san, parse_coordinate_move};
use crate::chess::{Position, ReverseMove};
use crate::entry::CountAndGameOffset;
use crate::error::{PosDbError, Result};
use crate::header::{GameHeader, HeaderResult, HeaderStore};
use crate::key::{Classification, Key, OrderKind, Outcome, Tier};
use crate::lookup::batched_lookup;
use crate::partition::Partition;

/// What a [`Database`](crate::database) implementation must expose for
/// [`execute`] to run queries against it, independent of whether
/// classifications are split across partitions (format-A) or embedded
/// in a shared one (format-B).
pub trait QueryBackend {
    /// The partition holding entries for `classification`.
    fn partition_for(&self, classification: Classification) -> &Partition;
    /// The header store holding games ingested for `tier`.
    fn header_store_for(&self, tier: Tier) -> &HeaderStore;
    /// Read-window threshold passed through to [`batched_lookup`].
    fn sequential_read_max_bytes(&self) -> usize;
}

/// One root position in a [`Request`]: a FEN, plus the coordinate-notation
/// move that reached it (absent for a game's starting position).
#[derive(Debug, Clone, Deserialize)]
pub struct PositionRequest {
    /// FEN of the position to query.
    pub fen: String,
    /// Coordinate notation (e.g. `"e2e4"`, `"e7e8q"`) of the move that
    /// reached `fen`, or `None` for a game root.
    #[serde(rename = "move")]
    pub mv: Option<String>,
}

/// Per-category fetch controls.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchingOptions {
    /// Expand legal moves from the root and include one entry per child.
    pub fetch_children: bool,
    /// Resolve and attach the root's first game.
    pub fetch_first_game: bool,
    /// Resolve and attach the root's last game.
    pub fetch_last_game: bool,
    /// Resolve and attach each child's first game. Ignored outside
    /// [`Category::Continuations`]: ambiguous under `HashOnlyOrder`.
    pub fetch_first_game_for_each_child: bool,
    /// Resolve and attach each child's last game. Same restriction as
    /// `fetch_first_game_for_each_child`.
    pub fetch_last_game_for_each_child: bool,
}

/// A query request: one or more root positions, a classification
/// filter, and up to two selection categories.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    /// Opaque client token, echoed back unchanged in the response.
    pub token: String,
    /// Root positions to query.
    pub positions: Vec<PositionRequest>,
    /// Strength tiers to include; must be non-empty.
    pub levels: Vec<Tier>,
    /// Outcomes to include; must be non-empty.
    pub results: Vec<Outcome>,
    /// Exact-reverse-move selection.
    pub continuations: Option<FetchingOptions>,
    /// Same-hash-different-move selection.
    pub transpositions: Option<FetchingOptions>,
    /// Same-hash selection, any reverse move. Mutually exclusive with
    /// the other two categories.
    pub all: Option<FetchingOptions>,
}

/// One game's metadata, as exposed at the query boundary.
#[derive(Debug, Clone, Serialize)]
pub struct GameInfo {
    /// Dense game id: also the offset into its tier's header index.
    pub game_id: u32,
    /// `"win" | "loss" | "draw"`, from white's perspective.
    pub result: String,
    /// `"YYYY.MM.DD"`; unknown components are recorded as `0`.
    pub date: String,
    /// Three-character ECO code, e.g. `"B90"`.
    pub eco: String,
    /// Tournament/event name.
    pub event: String,
    /// White player's name.
    pub white: String,
    /// Black player's name.
    pub black: String,
    /// Half-move count, if known.
    pub ply_count: Option<u32>,
}

/// One (level, result) bucket's counts and, if requested, boundary games.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedEntry {
    /// Strength tier this bucket covers.
    pub level: Tier,
    /// Outcome this bucket covers.
    pub result: Outcome,
    /// Number of games contributing to this (position, move, classification).
    pub count: u64,
    /// Earliest-run, earliest-offset contributing game, if requested.
    pub first_game: Option<GameInfo>,
    /// Latest-run, latest-offset contributing game, if requested.
    pub last_game: Option<GameInfo>,
}

/// One category's result for one root: a map from the move that reached
/// each position (`"--"` for the root itself) to its classified entries.
#[derive(Debug, Clone, Serialize, Default)]
pub struct CategoryResult {
    /// Move-in-SAN (or `"--"`) to classified entries.
    pub moves: HashMap<String, Vec<ClassifiedEntry>>,
}

/// The per-root result: whichever categories the request asked for.
#[derive(Debug, Clone, Serialize, Default)]
pub struct RootResult {
    /// Present iff the request carried a `continuations` block.
    pub continuations: Option<CategoryResult>,
    /// Present iff the request carried a `transpositions` block.
    pub transpositions: Option<CategoryResult>,
    /// Present iff the request carried an `all` block.
    pub all: Option<CategoryResult>,
}

/// The full response: the echoed token plus one [`RootResult`] per
/// requested root position, in request order.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    /// Echoed from [`Request::token`].
    pub token: String,
    /// One entry per [`Request::positions`], in order.
    pub roots: Vec<RootResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Continuations,
    Transpositions,
    All,
}

fn validate(request: &Request) -> Result<()> {
    let present = [request.continuations.is_some(), request.transpositions.is_some(), request.all.is_some()];
    let count = present.iter().filter(|&&b| b).count();
    if count == 0 {
        return Err(PosDbError::InvalidRequest("at least one of continuations/transpositions/all is required".into()));
    }
    if count > 2 {
        return Err(PosDbError::InvalidRequest("at most two categories may be requested".into()));
    }
    if request.all.is_some() && count > 1 {
        return Err(PosDbError::InvalidRequest("\"all\" cannot be combined with another category".into()));
    }
    if request.levels.is_empty() {
        return Err(PosDbError::InvalidRequest("levels must not be empty".into()));
    }
    if request.results.is_empty() {
        return Err(PosDbError::InvalidRequest("results must not be empty".into()));
    }
    Ok(())
}

/// Execute `request` against `backend`. Rejects structurally invalid
/// requests (bad category combination, empty filters, unparseable FEN
/// or move) before touching any partition.
pub fn execute(backend: &dyn QueryBackend, request: Request) -> Result<Response> {
    validate(&request)?;

    let mut roots: Vec<(Position, ReverseMove)> = Vec::with_capacity(request.positions.len());
    for pr in &request.positions {
        let pos = Position::from_fen(&pr.fen)
            .ok_or_else(|| PosDbError::InvalidRequest(format!("unparseable fen: {:?}", pr.fen)))?;
        let reverse_move = match &pr.mv {
            Some(s) => parse_coordinate_move(&pos, s)
                .ok_or_else(|| PosDbError::InvalidRequest(format!("unparseable move: {s:?}")))?,
            None => ReverseMove::root(),
        };
        roots.push((pos, reverse_move));
    }

    let seq_max = backend.sequential_read_max_bytes();
    let mut resolver = Resolver::default();
    let mut raw_roots = Vec::with_capacity(roots.len());

    for (pos, reverse_move) in &roots {
        let continuations = match &request.continuations {
            Some(opts) => Some(build_category(
                backend, pos, *reverse_move, &request.levels, &request.results, opts,
                Category::Continuations, &mut resolver, seq_max,
            )?),
            None => None,
        };
        let transpositions = match &request.transpositions {
            Some(opts) => Some(build_category(
                backend, pos, *reverse_move, &request.levels, &request.results, opts,
                Category::Transpositions, &mut resolver, seq_max,
            )?),
            None => None,
        };
        let all = match &request.all {
            Some(opts) => Some(build_category(
                backend, pos, *reverse_move, &request.levels, &request.results, opts,
                Category::All, &mut resolver, seq_max,
            )?),
            None => None,
        };
        raw_roots.push(RawRootResult { continuations, transpositions, all });
    }

    let resolved = resolver.resolve(backend)?;

    let roots = raw_roots
        .into_iter()
        .map(|r| RootResult {
            continuations: r.continuations.map(|c| finalize_category(c, &resolved)),
            transpositions: r.transpositions.map(|c| finalize_category(c, &resolved)),
            all: r.all.map(|c| finalize_category(c, &resolved)),
        })
        .collect();

    Ok(Response { token: request.token, roots })
}

struct RawRootResult {
    continuations: Option<RawCategoryResult>,
    transpositions: Option<RawCategoryResult>,
    all: Option<RawCategoryResult>,
}

struct RawCategoryResult {
    moves: HashMap<String, Vec<RawClassifiedEntry>>,
}

struct RawClassifiedEntry {
    level: Tier,
    result: Outcome,
    count: u64,
    first_pending: Option<usize>,
    last_pending: Option<usize>,
}

fn finalize_category(raw: RawCategoryResult, resolved: &[GameInfo]) -> CategoryResult {
    let moves = raw
        .moves
        .into_iter()
        .map(|(san, entries)| {
            let entries = entries
                .into_iter()
                .map(|e| ClassifiedEntry {
                    level: e.level,
                    result: e.result,
                    count: e.count,
                    first_game: e.first_pending.map(|i| resolved[i].clone()),
                    last_game: e.last_pending.map(|i| resolved[i].clone()),
                })
                .collect();
            (san, entries)
        })
        .collect();
    CategoryResult { moves }
}

/// Pending header fetches, batched per tier and resolved once after
/// every partition has been scanned, rather than one-off per boundary
/// game (the point of [`HeaderStore::query_by_ids`]'s own id-sort
/// amortization).
#[derive(Default)]
struct Resolver {
    pending: Vec<(Tier, u32)>,
}

impl Resolver {
    fn push(&mut self, tier: Tier, game_id: u32) -> usize {
        self.pending.push((tier, game_id));
        self.pending.len() - 1
    }

    fn resolve(&self, backend: &dyn QueryBackend) -> Result<Vec<GameInfo>> {
        let mut by_tier: HashMap<Tier, Vec<usize>> = HashMap::new();
        for (i, &(tier, _)) in self.pending.iter().enumerate() {
            by_tier.entry(tier).or_default().push(i);
        }

        let mut out: Vec<Option<GameInfo>> = vec![None; self.pending.len()];
        for (tier, slots) in by_tier {
            let ids: Vec<u32> = slots.iter().map(|&i| self.pending[i].1).collect();
            let headers = backend.header_store_for(tier).query_by_ids(&ids)?;
            for (slot, header) in slots.into_iter().zip(headers) {
                out[slot] = Some(game_info(&header, self.pending[slot].1));
            }
        }
        Ok(out.into_iter().map(|o| o.expect("every pending slot resolved")).collect())
    }
}

fn game_info(header: &GameHeader, game_id: u32) -> GameInfo {
    let result = match header.result {
        HeaderResult::WhiteWin => "win",
        HeaderResult::BlackWin => "loss",
        HeaderResult::Draw => "draw",
    };
    GameInfo {
        game_id,
        result: result.to_string(),
        date: format!("{:04}.{:02}.{:02}", header.date.year, header.date.month, header.date.day),
        eco: format!("{}{:02}", (b'A' + header.eco.letter) as char, header.eco.number),
        event: header.event.clone(),
        white: header.white.clone(),
        black: header.black.clone(),
        ply_count: Some(header.ply_count),
    }
}

#[allow(clippy::too_many_arguments)]
fn build_category(
    backend: &dyn QueryBackend,
    pos: &Position,
    reverse_move: ReverseMove,
    levels: &[Tier],
    results: &[Outcome],
    opts: &FetchingOptions,
    category: Category,
    resolver: &mut Resolver,
    sequential_read_max_bytes: usize,
) -> Result<RawCategoryResult> {
    let classifications: Vec<Classification> =
        levels.iter().flat_map(|&tier| results.iter().map(move |&outcome| Classification { tier, outcome })).collect();

    let mut moves = HashMap::new();
    let root_entries = query_position(
        backend, pos, reverse_move, &classifications, category,
        opts.fetch_first_game, opts.fetch_last_game, resolver, sequential_read_max_bytes,
    )?;
    moves.insert("--".to_string(), root_entries);

    if opts.fetch_children {
        let want_child_bounds = category == Category::Continuations;
        for mv in pseudo_legal_moves(pos) {
            let san = move_to_san(pos, mv);
            let (child_pos, child_reverse) = apply_move(pos, mv);
            let entries = query_position(
                backend, &child_pos, child_reverse, &classifications, category,
                want_child_bounds && opts.fetch_first_game_for_each_child,
                want_child_bounds && opts.fetch_last_game_for_each_child,
                resolver, sequential_read_max_bytes,
            )?;
            moves.insert(san, entries);
        }
    }

    Ok(RawCategoryResult { moves })
}

#[allow(clippy::too_many_arguments)]
fn query_position(
    backend: &dyn QueryBackend,
    pos: &Position,
    reverse_move: ReverseMove,
    classifications: &[Classification],
    category: Category,
    want_first: bool,
    want_last: bool,
    resolver: &mut Resolver,
    sequential_read_max_bytes: usize,
) -> Result<Vec<RawClassifiedEntry>> {
    let mut out = Vec::with_capacity(classifications.len());

    match category {
        Category::Continuations => {
            for &classification in classifications {
                let key = Key::new(pos, reverse_move, Some(classification));
                let hit = lookup_one(backend.partition_for(classification), OrderKind::FullOrder, key, sequential_read_max_bytes)?;
                out.push(raw_entry(classification, hit.count, hit.first, hit.last, want_first, want_last, resolver));
            }
        }
        Category::Transpositions | Category::All => {
            let hash_key = Key::new(pos, ReverseMove::root(), None);
            for (partition, group) in distinct_partitions(backend, classifications) {
                let scanned = scan_hash_only(partition, hash_key, reverse_move, &group, sequential_read_max_bytes)?;
                for classification in group {
                    let bucket = scanned.get(&classification).copied().unwrap_or_default();
                    let acc = if category == Category::Transpositions { bucket.transposition } else { bucket.all };
                    out.push(raw_entry(classification, acc.count, acc.first_game, acc.last_game, want_first, want_last, resolver));
                }
            }
        }
    }
    Ok(out)
}

fn raw_entry(
    classification: Classification,
    count: u64,
    first: Option<u64>,
    last: Option<u64>,
    want_first: bool,
    want_last: bool,
    resolver: &mut Resolver,
) -> RawClassifiedEntry {
    let first_pending = if want_first { first.map(|g| resolver.push(classification.tier, g as u32)) } else { None };
    let last_pending = if want_last { last.map(|g| resolver.push(classification.tier, g as u32)) } else { None };
    RawClassifiedEntry { level: classification.tier, result: classification.outcome, count, first_pending, last_pending }
}

struct RangeHit {
    count: u64,
    first: Option<u64>,
    last: Option<u64>,
}

/// Resolve `key` under `order` against every run in `partition`,
/// ascending by id, summing counts and tracking the first/last
/// contributing game per §4.7's run-id-then-offset tie-break.
fn lookup_one(partition: &Partition, order: OrderKind, key: Key, sequential_read_max_bytes: usize) -> Result<RangeHit> {
    let mut hit = RangeHit { count: 0, first: None, last: None };
    for run in partition.runs() {
        let index = match order {
            OrderKind::FullOrder => &run.index_full,
            OrderKind::HashOnlyOrder => &run.index_hash,
        };
        let ranges = batched_lookup(&run.data, Some(index), order, &[key], sequential_read_max_bytes)?;
        let range = match ranges.into_iter().next() {
            Some(Some(r)) if !r.is_empty() => r,
            _ => continue,
        };

        let lo = run.data.get(range.start)?;
        let hi = run.data.get(range.end - 1)?;
        if hit.first.is_none() {
            hit.first = lo.payload.game_offset;
        }
        hit.last = hi.payload.game_offset;

        let mut sum = 0u64;
        for i in range.clone() {
            sum += run.data.get(i)?.payload.count;
        }
        hit.count += sum;
    }
    Ok(hit)
}

#[derive(Debug, Clone, Copy, Default)]
struct Accum {
    count: u64,
    first_game: Option<u64>,
    last_game: Option<u64>,
}

impl Accum {
    fn observe(&mut self, payload: CountAndGameOffset) {
        self.count += payload.count;
        if self.first_game.is_none() {
            self.first_game = payload.game_offset;
        }
        self.last_game = payload.game_offset;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ScanBucket {
    continuation: Accum,
    transposition: Accum,
    all: Accum,
}

/// Scan `partition`'s `HashOnlyOrder` equal-range for `hash_key` once,
/// bucketing each entry by its decoded classification and splitting it
/// into the continuation subset (decoded reverse move equals
/// `reverse_move`) or the transposition subset (it doesn't).
fn scan_hash_only(
    partition: &Partition,
    hash_key: Key,
    reverse_move: ReverseMove,
    classifications: &[Classification],
    sequential_read_max_bytes: usize,
) -> Result<HashMap<Classification, ScanBucket>> {
    let want: HashSet<Classification> = classifications.iter().copied().collect();
    let mut out: HashMap<Classification, ScanBucket> =
        classifications.iter().map(|&c| (c, ScanBucket::default())).collect();

    for run in partition.runs() {
        let ranges =
            batched_lookup(&run.data, Some(&run.index_hash), OrderKind::HashOnlyOrder, &[hash_key], sequential_read_max_bytes)?;
        let range = match ranges.into_iter().next() {
            Some(Some(r)) if !r.is_empty() => r,
            _ => continue,
        };

        for i in range {
            let entry = run.data.get(i)?;
            let packed = entry.key.packed_reverse_move();
            let tier = match Tier::from_packed_ordinal(packed.tier()) {
                Some(t) => t,
                None => continue,
            };
            let outcome = match Outcome::from_packed_ordinal(packed.outcome()) {
                Some(o) => o,
                None => continue,
            };
            let classification = Classification { tier, outcome };
            if !want.contains(&classification) {
                continue;
            }
            let bucket = out.get_mut(&classification).expect("seeded for every requested classification");
            bucket.all.observe(entry.payload);
            if packed.reverse_move() == reverse_move {
                bucket.continuation.observe(entry.payload);
            } else {
                bucket.transposition.observe(entry.payload);
            }
        }
    }
    Ok(out)
}

/// Group `classifications` by the distinct partitions they resolve to
/// (identified by directory), so format-B's single shared partition is
/// scanned once rather than once per classification.
fn distinct_partitions<'a>(
    backend: &'a dyn QueryBackend,
    classifications: &[Classification],
) -> Vec<(&'a Partition, Vec<Classification>)> {
    let mut groups: Vec<(PathBuf, &'a Partition, Vec<Classification>)> = Vec::new();
    for &c in classifications {
        let partition = backend.partition_for(c);
        match groups.iter_mut().find(|(dir, _, _)| dir == partition.dir()) {
            Some(group) => group.2.push(c),
            None => groups.push((partition.dir().to_path_buf(), partition, vec![c])),
        }
    }
    groups.into_iter().map(|(_, p, cs)| (p, cs)).collect()
}
