mod reader;
mod types;

pub use reader::SuiteReader;
pub use types::*;
