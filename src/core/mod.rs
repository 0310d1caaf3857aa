pub mod fetch;
pub mod meta;
pub mod path;
pub mod rc4;
pub mod release;
pub mod tag;
