//! Assignment solvers: bipartite, 3-partite ILP, generalized k-partite.

pub mod bipartite;
pub mod ilp;
pub mod kpartite;
pub mod temporal;

pub use bipartite::AssignmentResult;
pub use ilp::{npartite_matching, Direction};
pub use kpartite::{IterativeConfig, KpartiteSolution, Objective, PartitionGraph};
pub use temporal::TemporalMatch;
