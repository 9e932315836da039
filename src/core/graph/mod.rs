//! Graph module for deadlock detection
//!
//! Holds the wait-for graph of processes and its cycle detector.

pub(crate) mod wait_for_graph;

pub use wait_for_graph::WaitForGraph;
