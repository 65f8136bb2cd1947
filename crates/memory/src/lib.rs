//! `sa-memory` — the local, file-backed Memory Store.
//!
//! Owns every piece of durable state the core needs across turns: per-user
//! facts, session bookkeeping, message history, chart locks (cached
//! calculator output), and the three-layer memory record (episodic window,
//! condensed summaries, stable profile facts). There is no external memory
//! service — everything lives in one JSON file under the configured state
//! directory, guarded by a single lock.

pub mod repository;

pub use repository::JsonRepository;
