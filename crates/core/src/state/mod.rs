pub mod db;

pub use db::{DbLocation, MemoryDb};
