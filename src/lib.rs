// Basic types used throughout flowgraph
pub mod types;
pub mod error;
// Date formats accepted for transaction times
pub mod timestamp;

// Ledger query trait with in-memory and DataFrame connectors
pub mod data_sources;
// The SQLite store is the primary ledger, so its connector lives in a separate module
pub mod sqlite_source;
// blockchain.info fetcher
pub mod api_source;

pub mod balance;
// Module for building the transfer graph from a LedgerSource
pub mod traversal;

// Types and functions for summarizing a transfer graph
pub mod summary;

// Exporters (DOT, GraphML, HTML) and loop detection
pub mod graph_utils;

pub mod config;
