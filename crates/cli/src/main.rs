//! # CLI - DriftKV Interactive Shell
//!
//! A REPL-style command-line interface for the DriftKV store. Reads commands
//! from stdin, executes them against the engine, and prints results to
//! stdout. Designed for both interactive use and scripted testing (pipe
//! commands via stdin).
//!
//! ## Commands
//!
//! ```text
//! PUT key text...     Insert or update a key with a text value
//! GET key             Look up a key (prints value or "(nil)")
//! DEL key             Delete a key
//! SCAN lo hi          Range scan, inclusive on both ends
//! KNN text... | k     Exact top-k by cosine similarity
//! HNSW text... | k    Approximate top-k through the graph index
//! SAVE [dir]          Persist the HNSW index (parallel writers)
//! LOAD [dir]          Reload the HNSW index from disk
//! FLUSH               Force flush memtable to an L0 SSTable
//! STATS               Print store debug info
//! RESET               Wipe the store
//! EXIT / QUIT         Shut down gracefully
//! ```
//!
//! `KNN` and `HNSW` split the argument on `|`: everything before is the
//! query text, the number after is `k` (default 3).
//!
//! ## Configuration
//!
//! All settings are controlled via environment variables:
//!
//! ```text
//! DRIFTKV_DATA_DIR   data directory                 (default: "data")
//! DRIFTKV_HNSW_DIR   HNSW index directory           (default: "hnsw_data")
//! DRIFTKV_EMBED_DIM  hashing embedder dimension     (default: 64)
//! ```

use anyhow::Result;
use embedding::HashingEmbedder;
use engine::{Options, Store};
use std::io::{self, BufRead, Write};

/// Reads a configuration value from the environment, falling back to
/// `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Splits `text... | k` into the query and k (default 3).
fn parse_query(args: &str) -> (String, usize) {
    match args.rsplit_once('|') {
        Some((text, k)) => (
            text.trim().to_string(),
            k.trim().parse().unwrap_or(3),
        ),
        None => (args.trim().to_string(), 3),
    }
}

fn print_hits(hits: &[(u64, String)]) {
    if hits.is_empty() {
        println!("(no results)");
        return;
    }
    for (i, (key, value)) in hits.iter().enumerate() {
        println!("{}. {} -> {}", i + 1, key, value);
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let data_dir = env_or("DRIFTKV_DATA_DIR", "data");
    let hnsw_dir = env_or("DRIFTKV_HNSW_DIR", "hnsw_data");
    let embed_dim: usize = env_or("DRIFTKV_EMBED_DIM", "64").parse().unwrap_or(64);

    let options = Options::new(&data_dir).hnsw_index_dir(&hnsw_dir);
    let mut store = Store::open(options, Box::new(HashingEmbedder::new(embed_dim)))?;

    println!(
        "DriftKV started (data={}, hnsw={}, dim={})",
        data_dir, hnsw_dir, embed_dim
    );
    println!("Commands: PUT key text | GET key | DEL key | SCAN lo hi");
    println!("          KNN text [| k] | HNSW text [| k] | SAVE [dir] | LOAD [dir]");
    println!("          FLUSH | STATS | RESET | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.splitn(2, char::is_whitespace);
        let cmd = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();

        match cmd.to_uppercase().as_str() {
            "" => {}
            "PUT" => {
                let mut kv = rest.splitn(2, char::is_whitespace);
                match (kv.next().and_then(|k| k.parse::<u64>().ok()), kv.next()) {
                    (Some(key), Some(text)) if !text.trim().is_empty() => {
                        match store.put(key, text.trim()) {
                            Ok(()) => println!("OK"),
                            Err(e) => println!("ERR put failed: {}", e),
                        }
                    }
                    _ => println!("ERR usage: PUT key text"),
                }
            }
            "GET" => match rest.parse::<u64>() {
                Ok(key) => match store.get(key) {
                    Ok(v) if v.is_empty() => println!("(nil)"),
                    Ok(v) => println!("{}", v),
                    Err(e) => println!("ERR read failed: {}", e),
                },
                Err(_) => println!("ERR usage: GET key"),
            },
            "DEL" => match rest.parse::<u64>() {
                Ok(key) => match store.del(key) {
                    Ok(true) => println!("OK"),
                    Ok(false) => println!("(not found)"),
                    Err(e) => println!("ERR del failed: {}", e),
                },
                Err(_) => println!("ERR usage: DEL key"),
            },
            "SCAN" => {
                let mut bounds = rest.split_whitespace();
                match (
                    bounds.next().and_then(|s| s.parse::<u64>().ok()),
                    bounds.next().and_then(|s| s.parse::<u64>().ok()),
                ) {
                    (Some(lo), Some(hi)) => match store.scan(lo, hi) {
                        Ok(results) => {
                            for (key, value) in &results {
                                println!("{} -> {}", key, value);
                            }
                            println!("({} entries)", results.len());
                        }
                        Err(e) => println!("ERR scan failed: {}", e),
                    },
                    _ => println!("ERR usage: SCAN lo hi"),
                }
            }
            "KNN" => {
                let (query, k) = parse_query(rest);
                if query.is_empty() {
                    println!("ERR usage: KNN text [| k]");
                } else {
                    match store.search_knn(&query, k) {
                        Ok(hits) => print_hits(&hits),
                        Err(e) => println!("ERR search failed: {}", e),
                    }
                }
            }
            "HNSW" => {
                let (query, k) = parse_query(rest);
                if query.is_empty() {
                    println!("ERR usage: HNSW text [| k]");
                } else {
                    match store.search_knn_hnsw(&query, k) {
                        Ok(hits) => print_hits(&hits),
                        Err(e) => println!("ERR search failed: {}", e),
                    }
                }
            }
            "SAVE" => {
                let dir = if rest.is_empty() { hnsw_dir.as_str() } else { rest };
                match store.save_hnsw_index(dir, true) {
                    Ok(()) => println!("OK saved to {}", dir),
                    Err(e) => println!("ERR save failed: {}", e),
                }
            }
            "LOAD" => {
                let dir = if rest.is_empty() { hnsw_dir.as_str() } else { rest };
                match store.load_hnsw_index(dir) {
                    Ok(()) => println!("OK loaded from {}", dir),
                    Err(e) => println!("ERR load failed: {}", e),
                }
            }
            "FLUSH" => match store.force_flush() {
                Ok(()) => println!("OK ({} sstables)", store.sstable_count()),
                Err(e) => println!("ERR flush failed: {}", e),
            },
            "STATS" => println!("{:?}", store),
            "RESET" => match store.reset() {
                Ok(()) => println!("OK"),
                Err(e) => println!("ERR reset failed: {}", e),
            },
            "EXIT" | "QUIT" => {
                println!("bye");
                break;
            }
            other => println!("unknown command: {}", other),
        }

        print!("> ");
        io::stdout().flush().ok();
    }

    Ok(())
}
