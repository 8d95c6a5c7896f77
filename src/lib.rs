//! # Corpus Pipeline
//!
//! Composable text-processing pipelines over uploaded CSV files, with
//! cached phrase detection and background corpus builds.
//!
//! A pipeline is an ordered list of steps, each naming a registered
//! component and its parameters. Running a pipeline over one column of an
//! upload yields a lazy stream of documents. In *preview* mode only the
//! first rows are pulled and expensive corpus-wide work is scheduled in the
//! background; in *produce* mode the full stream is materialized as a
//! corpus on disk.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────┐   ┌──────────────┐
//! │ CSV      │──▶│ Pipeline             │──▶│ Corpus store │
//! │ upload   │   │ step ▶ step ▶ phrases│   │ docs + info  │
//! └──────────┘   └──────────┬───────────┘   └──────┬───────┘
//!                           │ phash                │
//!                 ┌─────────▼─────────┐            │
//!                 │ Phrase model cache│            │
//!                 └─────────▲─────────┘            │
//!                           │                      │
//!                 ┌─────────┴─────────┐      ┌─────▼────┐
//!                 │ Worker ◀── queue  │      │ CLI/HTTP │
//!                 └───────────────────┘      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! corpus init                                   # storage root + job table
//! corpus preview docs.csv --column text --pipeline p.json
//! corpus worker                                 # run background builds
//! corpus build docs.csv --column text --pipeline p.json --corpus-id c1 --title "Docs"
//! corpus serve                                  # start HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Documents, steps, parameters, corpus metadata |
//! | [`error`] | Pipeline contract violations |
//! | [`stream`] | Document streams and input normalization |
//! | [`source`] | Lazy CSV column reader |
//! | [`component`] | Component trait and registry |
//! | [`components`] | Built-in text components |
//! | [`phash`] | Pipeline prefix hashing |
//! | [`pipeline`] | Pipeline executor |
//! | [`phrases`] | Phrase models, artifact cache, phrase step |
//! | [`jobs`] | Task queue interface and transports |
//! | [`coordinator`] | Job lookup, scheduling, and waiting |
//! | [`worker`] | Background job runner |
//! | [`corpus`] | Corpus materialization and store |
//! | [`storage`] | Filesystem layout and atomic writes |
//! | [`progress`] | Build progress reporting |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod component;
pub mod components;
pub mod config;
pub mod coordinator;
pub mod corpus;
pub mod db;
pub mod error;
pub mod jobs;
pub mod migrate;
pub mod models;
pub mod phash;
pub mod phrases;
pub mod pipeline;
pub mod progress;
pub mod server;
pub mod source;
pub mod storage;
pub mod stream;
pub mod worker;
