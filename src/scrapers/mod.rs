//! Site-independent scraping driven by compiled site descriptors.
//!
//! Every site goes through the same two phases:
//!
//! 1. **Listing**: fetch one archive unit and keep the links that look like
//!    articles ([`listing`])
//! 2. **Extraction**: fetch each new article and run the fallback chain for
//!    text and metadata ([`article`])
//!
//! | Module | Role |
//! |--------|------|
//! | [`listing`] | archive page → candidate links, or end-of-archive |
//! | [`article`] | article page → [`ArticleRecord`](crate::models::ArticleRecord) |
//! | [`text`] | noise-aware text walking, paragraphs, line fallback |
//! | [`jsonld`] | embedded structured data |
//!
//! Neither phase returns errors to the pipeline; failures are values.

pub mod article;
pub mod jsonld;
pub mod listing;
pub mod text;
