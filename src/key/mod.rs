//! Record keys, key ranges, and their ordered byte encoding.

mod coding;
mod data;
mod range;

pub use coding::{decode_key, encode_key};
pub use data::KeyData;
pub use range::KeyRange;
