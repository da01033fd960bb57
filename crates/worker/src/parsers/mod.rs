//! Concrete site-specific parsers (component H).

mod asos;

pub use asos::AsosParser;
