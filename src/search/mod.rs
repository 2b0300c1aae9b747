pub mod boolean;
pub mod fuzzy;
pub mod keywords;
pub mod lcs;
pub mod tokenizer;
