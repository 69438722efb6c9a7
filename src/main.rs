// CLASSIFICATION: COMMUNITY
// Filename: main.rs v0.5
// Author: Lukas Bower
// Date Modified: 2027-09-03

//! Demo entry point: boot the split worlds and replay the embedded
//! capture end to end.

use std::path::Path;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (config, credentials) = match std::env::args().nth(1) {
        Some(path) => cohtee::config::load_demo(Path::new(&path))?,
        None => cohtee::config::demo_pair(),
    };

    cohtee::boot(config, credentials)
}
