//! Compaction equivalence: parallel ingest across several PGN files,
//! then `merge_all`, checking that entry counts and query results are
//! unaffected by the merge.

mod common;

use posdb::chess::Position;
use posdb::ingest::IngestSource;
use posdb::key::{Outcome, Tier};
use posdb::query::{FetchingOptions, PositionRequest, Request};
use posdb::Config;

use common::{write_pgn, TestDb, ALL_FORMATS};

fn game(event: &str, result_tag: &str, moves: &str) -> String {
    format!("[Event \"{event}\"]\n[Result \"{result_tag}\"]\n\n{moves} {result_tag}\n")
}

#[test]
fn merge_all_preserves_counts_and_query_results() {
    for format in ALL_FORMATS {
        let dir = tempfile::tempdir().unwrap();
        let db = TestDb::open(format, dir.path(), Config::default()).unwrap();

        let games = [
            game("g0", "1-0", "1. e4 e5 2. Nf3 Nc6"),
            game("g1", "0-1", "1. d4 d5 2. c4 e6"),
            game("g2", "1/2-1/2", "1. e4 e5 2. Nf3 Nc6"),
            game("g3", "1-0", "1. e4 c5"),
            game("g4", "0-1", "1. d4 Nf6"),
        ];
        let sources: Vec<IngestSource> = games
            .iter()
            .enumerate()
            .map(|(i, pgn)| IngestSource { path: write_pgn(dir.path(), &format!("g{i}.pgn"), pgn), tier: Tier::Human })
            .collect();

        let stats = db.import(&sources, true).unwrap();
        assert_eq!(stats.num_games, 5);

        let request = || Request {
            token: "t".to_string(),
            positions: vec![PositionRequest { fen: Position::start().to_fen(), mv: None }],
            levels: vec![Tier::Human],
            results: vec![Outcome::WhiteWin, Outcome::BlackWin, Outcome::Draw],
            continuations: None,
            transpositions: None,
            all: Some(FetchingOptions {
                fetch_children: false,
                fetch_first_game: false,
                fetch_last_game: false,
                fetch_first_game_for_each_child: false,
                fetch_last_game_for_each_child: false,
            }),
        };

        let before = db.execute_query(request()).unwrap();
        let before_total: u64 =
            before.roots[0].all.as_ref().unwrap().moves["--"].iter().map(|e| e.count).sum();
        assert_eq!(before_total, 5);

        db.merge_all().unwrap();

        let after = db.execute_query(request()).unwrap();
        let after_total: u64 = after.roots[0].all.as_ref().unwrap().moves["--"].iter().map(|e| e.count).sum();
        assert_eq!(after_total, before_total, "format {format:?}: merge_all must not change query results");
    }
}

#[test]
fn merge_all_is_idempotent() {
    for format in ALL_FORMATS {
        let dir = tempfile::tempdir().unwrap();
        let db = TestDb::open(format, dir.path(), Config::default()).unwrap();

        let pgn = game("g0", "1-0", "1. e4 e5");
        let path = write_pgn(dir.path(), "g.pgn", &pgn);
        db.import(&[IngestSource { path, tier: Tier::Human }], false).unwrap();

        db.merge_all().unwrap();
        let request = Request {
            token: "t".to_string(),
            positions: vec![PositionRequest { fen: Position::start().to_fen(), mv: None }],
            levels: vec![Tier::Human],
            results: vec![Outcome::WhiteWin, Outcome::BlackWin, Outcome::Draw],
            continuations: None,
            transpositions: None,
            all: Some(FetchingOptions {
                fetch_children: false,
                fetch_first_game: false,
                fetch_last_game: false,
                fetch_first_game_for_each_child: false,
                fetch_last_game_for_each_child: false,
            }),
        };
        let once = db.execute_query(request.clone()).unwrap();
        db.merge_all().unwrap();
        let twice = db.execute_query(request).unwrap();

        let once_total: u64 = once.roots[0].all.as_ref().unwrap().moves["--"].iter().map(|e| e.count).sum();
        let twice_total: u64 = twice.roots[0].all.as_ref().unwrap().moves["--"].iter().map(|e| e.count).sum();
        assert_eq!(once_total, twice_total, "format {format:?}: merge_all ∘ merge_all = merge_all");
    }
}
