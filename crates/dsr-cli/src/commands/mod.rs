//! Command handler modules for dsr-cli.

pub mod run;
