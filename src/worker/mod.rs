pub mod crawler;

pub use crawler::{CrawlWorker, UnitStats};
