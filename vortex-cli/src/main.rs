//! Placeholder CLI shell.
//!
//! Command dispatch, configuration loading from disk/env, credential
//! encryption at rest, and terminal UI are out of scope for `vortex-core`
//! — this binary exists only so the workspace has a runnable entry point
//! that a real CLI layer would replace.

fn main() {
    println!("vortex-cli — not yet implemented; see vortex-core for the download engine");
}
