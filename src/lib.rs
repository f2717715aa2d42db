//! Upload offload rewriting for axum services.
//!
//! A front proxy strips file parts out of multipart requests, stores them in
//! temporary files and forwards a signed header naming each extracted field.
//! [`multipart::rewrite_multipart`] verifies that header, opens the files under
//! an [`allow_list::AllowList`] and splices the handles back into the request
//! [`params::Params`], so handlers read uploads the same way with or without
//! the proxy in front.

pub mod allow_list;
pub mod config;
pub mod error;
pub mod field_path;
pub mod inspect;
pub mod logging;
pub mod message;
pub mod multipart;
pub mod params;
pub mod registry;
pub mod rewrite;
pub mod uploaded_file;
