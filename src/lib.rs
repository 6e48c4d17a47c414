pub mod arena;
pub mod cursor;
pub mod error;
pub mod machofile;
pub mod metadata;
pub mod pointer;
pub mod processor;
pub mod records;
pub mod strings;
pub mod swift;
pub mod translate;
pub mod visitor;
