pub mod cell;
pub mod clock;
pub mod combiner;
pub mod config;
pub mod constants;
pub mod directory;
pub mod engine;
pub mod error;
pub mod estimators;
pub mod geodesy;
pub mod history;
pub mod output;
pub mod report;
pub mod solver;
