// Library root
// -----------
// This crate exposes the publish pipeline as a library. The binary
// (`main.rs`) wires the real collaborators into it.
//
// Module responsibilities:
// - `pipeline`: the publish run itself (preflight, naming, upload, testing
//   group upsert) over injected collaborators.
// - `storage` / `s3`: bucket config validation, directory upload and public
//   URLs; `s3` is the aws-sdk-s3 transport.
// - `api`: blocking client for the VK testing-group methods.
// - `store`: persisted settings and cached access tokens.
// - `config`: env > CLI > settings merge of the storage config.
// - `naming`: default upload prefix and group name from git identity.
// - `git`, `ui`, `cli`: the thin shells around git, the terminal and clap.
pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod git;
pub mod naming;
pub mod pipeline;
pub mod s3;
pub mod storage;
pub mod store;
pub mod ui;

pub use error::{ErrorKind, PublishError};
