// Library root
// -----------
// This crate exposes the pieces of the `mineru` CLI as a library; the binary
// (`main.rs`) only parses arguments and hands over to `app`.
//
// Module responsibilities:
// - `config`: the local token/config file and resolved settings.
// - `api`: the blocking HTTP client for the MinerU service and the
//   `ParseService` trait the workflow is written against.
// - `task`: sources, options, task lifecycle and the final report.
// - `submit`, `poll`, `fetch`: submission, round-robin waiting, and result
//   download/extraction.
// - `cli`, `app`, `ui`: argument definitions, command workflows, and the
//   terminal side (prompts, spinner, colours).
pub mod api;
pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod poll;
pub mod shutdown;
pub mod submit;
pub mod task;
pub mod ui;
