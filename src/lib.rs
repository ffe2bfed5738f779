pub mod assign;
pub mod calib;
pub mod correspond;
pub mod error;
pub mod geometry;
pub mod io;
pub mod track;
