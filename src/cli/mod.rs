//! Terminal-facing pieces shared by the `layerhash` binary.
#![allow(missing_docs)]

pub mod prompt;

pub use self::prompt::PromptCredentials;
