#![doc = include_str!("../readme.md")]
pub mod errors;
pub mod parser;
pub mod record;
pub mod vocabulary;

pub mod prelude {
    pub use crate::errors::{CommunicationError, GrammarError};
    pub use crate::parser::Parser;
    pub use crate::record::{
        Argument, Clearance, ClearanceKind, CommandRecord, Condition, Fix,
        Mode,
    };
    pub use crate::vocabulary::Vocabulary;
}
