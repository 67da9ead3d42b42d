pub mod client;
pub mod config;
pub mod feeds;
pub mod normalize;
pub mod pipeline;
pub mod run;
pub mod runtime;
pub mod titles;
pub mod wikitext;
pub mod writer;

#[cfg(test)]
mod test_support;
