//! # What is Kairos?
//!
//! Kairos runs a fictional stock market whose prices only move when an operator asks for the next
//! timestep. Nothing ticks on its own: every advance is an explicit call, every price written is
//! indexed by the step that produced it, and the whole history is kept in a store so that the
//! market survives restarts.
//!
//! # Implementation
//!
//! A running market is composed of:
//! - A source, [SampleSource](crate::source::sample::SampleSource) is an example. The source
//! supplies company parameters (initial price, drift, volatility) and any prices the game master
//! wants to force on the next step. Sources are treated as optional data: when they fail the
//! engine keeps going with whatever it loaded last.
//! - A store, [SqliteStore](crate::store::sqlite::SqliteStore) is an example. The store holds
//! price records keyed by symbol and step, and the singleton market state which carries the step
//! counter and the generation flag.
//! - The [MarketEngine](crate::engine::MarketEngine), which orchestrates a single advance: takes
//! the [GenerationLock](crate::lock::GenerationLock), loads parameters and overrides, runs the
//! [price model](crate::model) for every symbol that isn't overridden, writes the records and
//! finally moves the step counter.
//! - The server implementation returning JSON responses over the engine, see [http].
//!
//! # Generation lock
//!
//! Only one advance can be in flight at a time. The flag lives in the store, not in memory, so it
//! also excludes other processes pointed at the same database. If a process dies while holding it
//! the market stays locked until an operator clears it; the engine cannot know whether the
//! interrupted write completed so it never unlocks on its own.
//!
//! ``
//! cargo run --bin market_server [ipv4_address] [port]
//! ``
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod lock;
pub mod model;
pub mod resolver;
pub mod source;
pub mod store;
pub mod types;
